//! A device that replays a fixed script of poll results.
//!
//! Used to drive the pipeline deterministically in tests: every `fetch_block`
//! call consumes the next entry of the script, and an exhausted script behaves
//! like an idle device that has no new samples.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eeg_types::{ChannelDescriptor, MeasurementType};
use log::debug;

use crate::types::{DeviceError, DeviceHandle, DeviceStatus, Fetched};

/// One scripted answer to a data request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedPoll {
    /// A chunk of words holding `sample_sets` sample sets.
    Block { words: Vec<u32>, sample_sets: u32 },
    /// No new data on this poll.
    Empty,
    /// The device fails the request.
    Fail(DeviceError),
}

impl ScriptedPoll {
    /// A well-formed chunk of float samples, `values.len()` must be a multiple of `width`.
    pub fn floats(values: &[f32], width: usize) -> Self {
        ScriptedPoll::Block {
            words: values.iter().map(|v| v.to_bits()).collect(),
            sample_sets: (values.len() / width.max(1)) as u32,
        }
    }
}

/// Counters shared with the test that owns the script.
#[derive(Debug, Default)]
pub struct ScriptCalls {
    pub polls: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

pub struct ScriptedDevice {
    channels: Vec<ChannelDescriptor>,
    impedance_channels: Vec<ChannelDescriptor>,
    script: VecDeque<ScriptedPoll>,
    status: DeviceStatus,
    // Starts accepted before `start_sampling` fails with the error.
    refuse_start: Option<(usize, DeviceError)>,
    calls: Arc<ScriptCalls>,
}

impl ScriptedDevice {
    pub fn new(channels: Vec<ChannelDescriptor>, script: Vec<ScriptedPoll>) -> Self {
        Self {
            impedance_channels: channels.clone(),
            channels,
            script: script.into(),
            status: DeviceStatus::Connected,
            refuse_start: None,
            calls: Arc::new(ScriptCalls::default()),
        }
    }

    pub fn with_impedance_channels(mut self, channels: Vec<ChannelDescriptor>) -> Self {
        self.impedance_channels = channels;
        self
    }

    /// Makes `start_sampling` fail with `err`.
    pub fn refusing_start(self, err: DeviceError) -> Self {
        self.refusing_start_after(0, err)
    }

    /// Accepts the first `starts` calls to `start_sampling`, then fails with `err`.
    pub fn refusing_start_after(mut self, starts: usize, err: DeviceError) -> Self {
        self.refuse_start = Some((starts, err));
        self
    }

    pub fn calls(&self) -> Arc<ScriptCalls> {
        self.calls.clone()
    }
}

impl DeviceHandle for ScriptedDevice {
    fn channels(&self, measurement: MeasurementType) -> Result<Vec<ChannelDescriptor>, DeviceError> {
        Ok(match measurement {
            MeasurementType::Normal => self.channels.clone(),
            MeasurementType::Impedance => self.impedance_channels.clone(),
        })
    }

    fn start_sampling(&mut self, measurement: MeasurementType) -> Result<(), DeviceError> {
        let previous = self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if let Some((accepted, err)) = &self.refuse_start {
            if previous >= *accepted {
                return Err(err.clone());
            }
        }
        self.status = DeviceStatus::Sampling(measurement);
        Ok(())
    }

    fn stop_sampling(&mut self) -> Result<(), DeviceError> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        self.status = DeviceStatus::Connected;
        Ok(())
    }

    fn fetch_block(&mut self, buffer: &mut [u32], _timeout: Duration) -> Result<Fetched, DeviceError> {
        if !matches!(self.status, DeviceStatus::Sampling(_)) {
            return Err(DeviceError::NotSampling);
        }
        self.calls.polls.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front() {
            Some(ScriptedPoll::Block { words, sample_sets }) => {
                let n = words.len().min(buffer.len());
                buffer[..n].copy_from_slice(&words[..n]);
                debug!("ScriptedDevice delivered {} words", n);
                Ok(Fetched {
                    sample_sets,
                    words: n,
                })
            }
            Some(ScriptedPoll::Fail(err)) => {
                self.status = DeviceStatus::Faulted;
                Err(err)
            }
            Some(ScriptedPoll::Empty) | None => Ok(Fetched::NONE),
        }
    }
}
