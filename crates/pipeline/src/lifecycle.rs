//! Lifecycle controller of one device's sampling pipeline
//!
//! A measurement runs on two dedicated threads joined by the transfer queue:
//! the fetcher polls the device and the decoder converts and publishes. The
//! controller owns the state machine
//! `Idle -> Running -> Stopping -> Stopped` and guarantees that a stop joins
//! both threads, and that every block accepted by the queue is decoded and
//! published before `stop()` returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_affinity::CoreId;
use eeg_sensor::{DeviceHandle, SharedDevice};
use eeg_types::{ChannelLayout, DeviceId, MeasurementType};
use flume::Sender;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::SamplingContext;
use crate::control::{EventSink, MeasurementId, PipelineEvent, StopReason};
use crate::decoder::{ConversionMode, Decoder, DecoderWorker};
use crate::error::{panic_message, PipelineError, PipelineResult};
use crate::fetcher::{Fetcher, FetcherWorker};
use crate::queue::transfer_queue;
use crate::stats::{PipelineStats, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    /// Shutting down, either on request or because a worker failed.
    Stopping,
    /// The last measurement is over; behaves like `Idle` for the next start.
    Stopped,
}

struct RunInner {
    state: PipelineState,
    fault: Option<PipelineError>,
}

/// State and first fault of the current measurement, shared with the workers.
pub(crate) struct RunState {
    inner: Mutex<RunInner>,
    changed: Condvar,
}

impl RunState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RunInner {
                state: PipelineState::Idle,
                fault: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> PipelineState {
        self.lock().state
    }

    fn set_state(&self, state: PipelineState) {
        self.lock().state = state;
        self.changed.notify_all();
    }

    fn begin(&self) {
        let mut inner = self.lock();
        inner.state = PipelineState::Running;
        inner.fault = None;
    }

    /// Records the first fault of the measurement and forces it to stop.
    pub(crate) fn fault(&self, err: PipelineError) {
        let mut inner = self.lock();
        if inner.fault.is_none() {
            inner.fault = Some(err);
        }
        if inner.state == PipelineState::Running {
            inner.state = PipelineState::Stopping;
        }
        drop(inner);
        self.changed.notify_all();
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.lock().fault.is_some()
    }

    fn take_fault(&self) -> Option<PipelineError> {
        self.lock().fault.take()
    }

    fn wait_for_fault(&self, timeout: Duration) -> Option<PipelineError> {
        let inner = self.lock();
        let (inner, _) = self
            .changed
            .wait_timeout_while(inner, timeout, |i| i.fault.is_none())
            .unwrap_or_else(|e| e.into_inner());
        inner.fault.clone()
    }
}

/// Summary of a finished measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub measurement: MeasurementId,
    pub measurement_type: MeasurementType,
    pub reason: StopReason,
    pub stats: StatsSnapshot,
}

struct ActiveRun {
    measurement: MeasurementId,
    measurement_type: MeasurementType,
    layout: ChannelLayout,
    stop_tx: Sender<()>,
    fetcher: JoinHandle<()>,
    decoder: JoinHandle<()>,
}

/// Runs measurements of one device and publishes them to the context's hub.
pub struct SamplingPipeline {
    device_id: DeviceId,
    device: SharedDevice,
    config: PipelineConfig,
    context: Arc<SamplingContext>,
    events: EventSink,
    run: Arc<RunState>,
    stats: Arc<PipelineStats>,
    active: Option<ActiveRun>,
}

impl SamplingPipeline {
    pub fn new(
        device_id: DeviceId,
        device: SharedDevice,
        config: PipelineConfig,
        context: Arc<SamplingContext>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            device_id,
            device,
            events: context.event_sink(),
            config,
            context,
            run: Arc::new(RunState::new()),
            stats: Arc::new(PipelineStats::default()),
            active: None,
        })
    }

    fn lock_device(&self) -> MutexGuard<'_, Box<dyn DeviceHandle>> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn state(&self) -> PipelineState {
        self.run.state()
    }

    /// Counters of the running measurement, or of the last one.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn measurement(&self) -> Option<MeasurementId> {
        self.active.as_ref().map(|a| a.measurement)
    }

    /// Channel layout of the running measurement.
    pub fn layout(&self) -> Option<&ChannelLayout> {
        self.active.as_ref().map(|a| &a.layout)
    }

    /// Blocks until a worker faults or `timeout` elapses.
    pub fn wait_for_fault(&self, timeout: Duration) -> Option<PipelineError> {
        self.run.wait_for_fault(timeout)
    }

    /// Starts a measurement of the given type.
    pub fn start(&mut self, measurement_type: MeasurementType) -> PipelineResult<MeasurementId> {
        if self.active.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }
        if !self.context.claim(self.device_id) {
            return Err(PipelineError::DeviceBusy(self.device_id));
        }

        match self.launch(measurement_type) {
            Ok(run) => {
                let measurement = run.measurement;
                info!(
                    device = %self.device_id,
                    %measurement,
                    ?measurement_type,
                    channels = run.layout.channels_per_set(),
                    "Measurement started"
                );
                self.events.emit(PipelineEvent::Started {
                    device: self.device_id,
                    measurement,
                    measurement_type,
                    channels: run.layout.channels_per_set(),
                });
                self.active = Some(run);
                Ok(measurement)
            }
            Err(err) => {
                self.context.release(self.device_id);
                warn!(device = %self.device_id, "Failed to start measurement: {}", err);
                Err(err)
            }
        }
    }

    fn launch(&mut self, measurement_type: MeasurementType) -> PipelineResult<ActiveRun> {
        let channels = self.lock_device().channels(measurement_type)?;
        let layout = ChannelLayout::new(channels)?;
        let mode = match measurement_type {
            MeasurementType::Normal => ConversionMode::Physical,
            MeasurementType::Impedance => ConversionMode::Raw,
        };

        // Swapped in only once the device accepts the start, so a refused
        // start leaves the last measurement's counters readable.
        let stats = Arc::new(PipelineStats::default());
        let (producer, consumer) = transfer_queue(self.config.queue_capacity, self.config.offer_timeout());

        let cores = if self.config.pin_workers {
            let cores = core_affinity::get_core_ids().unwrap_or_default();
            if cores.is_empty() {
                warn!("Could not get core IDs. Cannot set thread affinity.");
            }
            cores
        } else {
            Vec::new()
        };

        let worker = DecoderWorker {
            device: self.device_id,
            decoder: Decoder::new(self.device_id, layout.clone(), mode),
            queue: consumer,
            hub: self.context.hub().clone(),
            stats: stats.clone(),
            events: self.events.clone(),
            wait: self.config.decoder_wait(),
        };
        let run = self.run.clone();
        let decoder = spawn_worker("decoder", self.device_id, cores.get(1 % cores.len().max(1)).copied(), move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| worker.run())) {
                let message = panic_message(payload.as_ref());
                error!("Decoder panicked: {}", message);
                run.fault(PipelineError::WorkerPanicked {
                    worker: "decoder",
                    message,
                });
            }
        })?;

        if let Err(err) = self.lock_device().start_sampling(measurement_type) {
            // Closing the queue lets the idle decoder exit.
            drop(producer);
            let _ = decoder.join();
            return Err(err.into());
        }

        self.stats = stats;
        self.run.begin();
        let (stop_tx, stop_rx) = flume::bounded(1);
        let worker = FetcherWorker {
            device_id: self.device_id,
            fetcher: Fetcher::new(
                self.device.clone(),
                &layout,
                self.config.max_sample_sets_per_poll,
                self.config.fetch_timeout(),
            ),
            queue: producer,
            stop_rx,
            poll_interval: self.config.poll_interval(),
            stats: self.stats.clone(),
            events: self.events.clone(),
            run: self.run.clone(),
        };
        let fetcher = match spawn_worker("fetcher", self.device_id, cores.first().copied(), move || worker.run()) {
            Ok(handle) => handle,
            Err(err) => {
                // The unspawned closure owned the producer, so the decoder is already draining.
                let _ = self.lock_device().stop_sampling();
                let _ = decoder.join();
                self.run.set_state(PipelineState::Idle);
                return Err(err);
            }
        };

        Ok(ActiveRun {
            measurement: Uuid::new_v4(),
            measurement_type,
            layout,
            stop_tx,
            fetcher,
            decoder,
        })
    }

    /// Stops the running measurement and waits until every accepted block
    /// has been published.
    ///
    /// Also valid after a fault has already forced the pipeline into
    /// `Stopping`; the report then carries the fault as its reason.
    pub fn stop(&mut self) -> PipelineResult<StopReport> {
        let Some(run) = self.active.take() else {
            return Err(PipelineError::NotRunning);
        };
        self.run.set_state(PipelineState::Stopping);
        info!(device = %self.device_id, measurement = %run.measurement, "Stopping measurement");

        // The fetcher may already be gone after a fault.
        let _ = run.stop_tx.try_send(());
        let mut worker_panic = None;
        if let Err(payload) = run.fetcher.join() {
            worker_panic = Some(PipelineError::WorkerPanicked {
                worker: "fetcher",
                message: panic_message(payload.as_ref()),
            });
        }

        if let Err(err) = self.lock_device().stop_sampling() {
            warn!(device = %self.device_id, "Device refused to stop sampling: {}", err);
        }

        if let Err(payload) = run.decoder.join() {
            worker_panic.get_or_insert(PipelineError::WorkerPanicked {
                worker: "decoder",
                message: panic_message(payload.as_ref()),
            });
        }
        debug!(device = %self.device_id, "Workers joined");

        let reason = match self.run.take_fault().or(worker_panic) {
            Some(err) => StopReason::Fault(err),
            None => StopReason::Requested,
        };
        self.run.set_state(PipelineState::Stopped);
        self.context.release(self.device_id);

        let stats = self.stats.snapshot();
        info!(
            device = %self.device_id,
            measurement = %run.measurement,
            published = stats.batches_published,
            dropped = stats.blocks_dropped,
            "Measurement stopped ({:?})",
            reason
        );
        self.events.emit(PipelineEvent::Stopped {
            device: self.device_id,
            measurement: run.measurement,
            faulted: reason.is_fault(),
        });

        Ok(StopReport {
            measurement: run.measurement,
            measurement_type: run.measurement_type,
            reason,
            stats,
        })
    }
}

impl Drop for SamplingPipeline {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(err) = self.stop() {
                warn!(device = %self.device_id, "Failed to stop pipeline on drop: {}", err);
            }
        }
    }
}

fn spawn_worker<F>(worker: &'static str, device: DeviceId, core: Option<CoreId>, body: F) -> PipelineResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{}", device, worker))
        .spawn(move || {
            if let Some(core) = core {
                if core_affinity::set_for_current(core) {
                    debug!("Set affinity for {} to core {:?}", worker, core);
                } else {
                    warn!("Failed to set affinity for {} to core {:?}", worker, core);
                }
            }
            body()
        })
        .map_err(|e| PipelineError::Spawn {
            worker,
            message: e.to_string(),
        })
}
