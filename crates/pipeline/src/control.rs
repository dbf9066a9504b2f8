//! Diagnostic events emitted by a running pipeline.
//!
//! Events are best-effort: they go through a bounded channel owned by the
//! `SamplingContext`, and are dropped when nobody drains it. Anything that must
//! not be lost (drops, drift, faults) is also counted in `PipelineStats` or
//! returned from `stop()`.

use eeg_types::{DeviceId, MeasurementType};
use flume::{Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::trace;
use uuid::Uuid;

use crate::error::PipelineError;

/// Identifies one measurement (one `start()`..`stop()` cycle).
pub type MeasurementId = Uuid;

/// Why a measurement ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// `stop()` was called on a healthy pipeline.
    Requested,
    /// A worker failed and forced the pipeline into `Stopping`.
    Fault(PipelineError),
}

impl StopReason {
    pub fn is_fault(&self) -> bool {
        matches!(self, StopReason::Fault(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        device: DeviceId,
        measurement: MeasurementId,
        measurement_type: MeasurementType,
        channels: usize,
    },
    /// The queue was full and the oldest block was discarded.
    BlockDropped {
        device: DeviceId,
        sequence: u64,
        dropped_total: u64,
    },
    /// A block did not match the channel layout and was skipped.
    FormatMismatch {
        device: DeviceId,
        sequence: u64,
        message: String,
    },
    /// The counter channel jumped; fires at most once per measurement.
    CounterDrift {
        device: DeviceId,
        previous: f64,
        current: f64,
    },
    ConsumerFailed {
        device: DeviceId,
        consumer: String,
        message: String,
    },
    Fault {
        device: DeviceId,
        message: String,
    },
    Stopped {
        device: DeviceId,
        measurement: MeasurementId,
        faulted: bool,
    },
}

/// Sending side of the event channel, cloned into every worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<PipelineEvent>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!("Event channel full, discarding {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
