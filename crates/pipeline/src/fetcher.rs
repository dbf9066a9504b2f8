//! # Sample Fetcher
//!
//! Polls the device on a fixed cadence, copies every non-empty chunk out of a
//! reused scratch buffer into an owned `RawSampleBlock` and offers it to the
//! transfer queue. The poll wait doubles as the stop signal wait, so a stop
//! request is observed without sitting out a full cadence.

use std::sync::Arc;
use std::time::Duration;

use eeg_sensor::SharedDevice;
use eeg_types::{ChannelLayout, DeviceId, RawSampleBlock};
use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, trace};

use crate::control::{EventSink, PipelineEvent};
use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::RunState;
use crate::queue::{Offer, QueueClosed, QueueProducer};
use crate::stats::PipelineStats;

/// One device query per call, into a scratch buffer that is never handed out.
pub struct Fetcher {
    device: SharedDevice,
    scratch: Vec<u32>,
    next_sequence: u64,
    fetch_timeout: Duration,
}

impl Fetcher {
    pub fn new(device: SharedDevice, layout: &ChannelLayout, max_sample_sets: usize, fetch_timeout: Duration) -> Self {
        Self {
            device,
            scratch: vec![0; max_sample_sets.max(1) * layout.channels_per_set()],
            next_sequence: 0,
            fetch_timeout,
        }
    }

    /// Asks the device for whatever it has buffered.
    ///
    /// Returns `Ok(None)` when no complete sample set was available.
    pub fn poll(&mut self) -> PipelineResult<Option<RawSampleBlock>> {
        let fetched = {
            let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
            device.fetch_block(&mut self.scratch, self.fetch_timeout)?
        };
        if fetched.sample_sets == 0 {
            return Ok(None);
        }

        let words = fetched.words.min(self.scratch.len());
        let block = RawSampleBlock::copy_from(&self.scratch[..words], fetched.sample_sets, self.next_sequence);
        self.next_sequence += 1;
        Ok(Some(block))
    }

    pub fn blocks_fetched(&self) -> u64 {
        self.next_sequence
    }
}

pub(crate) struct FetcherWorker {
    pub device_id: DeviceId,
    pub fetcher: Fetcher,
    pub queue: QueueProducer,
    pub stop_rx: Receiver<()>,
    pub poll_interval: Duration,
    pub stats: Arc<PipelineStats>,
    pub events: EventSink,
    pub run: Arc<RunState>,
}

impl FetcherWorker {
    /// Runs until stopped or until the device fails. The queue producer is
    /// dropped on return, which lets the decoder drain and finish.
    pub(crate) fn run(mut self) {
        info!(device = %self.device_id, "Fetcher started");
        loop {
            if self.run.is_faulted() {
                break;
            }
            PipelineStats::bump(&self.stats.polls);
            match self.fetcher.poll() {
                Ok(Some(block)) => {
                    if let Err(QueueClosed(block)) = self.enqueue(block) {
                        self.fail(PipelineError::WorkerPanicked {
                            worker: "decoder",
                            message: format!("decoder exited before block {}", block.sequence()),
                        });
                        break;
                    }
                }
                Ok(None) => trace!(device = %self.device_id, "No new sample sets"),
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }

            match self.stop_rx.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(
            device = %self.device_id,
            blocks = self.fetcher.blocks_fetched(),
            "Fetcher stopped"
        );
    }

    fn enqueue(&mut self, block: RawSampleBlock) -> Result<(), QueueClosed> {
        let sequence = block.sequence();
        match self.queue.offer(block)? {
            Offer::Accepted => {}
            Offer::AcceptedAfterDrop { dropped_sequence } => {
                let dropped_total = PipelineStats::bump(&self.stats.blocks_dropped);
                self.events.emit(PipelineEvent::BlockDropped {
                    device: self.device_id,
                    sequence: dropped_sequence,
                    dropped_total,
                });
            }
        }
        PipelineStats::bump(&self.stats.blocks_enqueued);
        debug!(device = %self.device_id, sequence, resident = self.queue.resident(), "Block enqueued");
        Ok(())
    }

    fn fail(&self, err: PipelineError) {
        error!(device = %self.device_id, "Fetcher failed, stopping measurement: {}", err);
        self.events.emit(PipelineEvent::Fault {
            device: self.device_id,
            message: err.to_string(),
        });
        self.run.fault(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_sensor::{shared, DeviceError, DeviceHandle, ScriptedDevice, ScriptedPoll};
    use eeg_types::{ChannelDescriptor, ChannelKind, MeasurementType};

    fn layout() -> ChannelLayout {
        ChannelLayout::new(vec![
            ChannelDescriptor::float(0, ChannelKind::Eeg, 0),
            ChannelDescriptor::float(1, ChannelKind::Eeg, 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_poll_copies_out_of_scratch() {
        let mut device = ScriptedDevice::new(
            layout().channels().to_vec(),
            vec![
                ScriptedPoll::floats(&[1.0, 2.0, 3.0, 4.0], 2),
                ScriptedPoll::Empty,
                ScriptedPoll::floats(&[5.0, 6.0], 2),
            ],
        );
        device.start_sampling(MeasurementType::Normal).unwrap();
        let mut fetcher = Fetcher::new(shared(device), &layout(), 16, Duration::ZERO);

        let first = fetcher.poll().unwrap().unwrap();
        assert!(fetcher.poll().unwrap().is_none());
        let second = fetcher.poll().unwrap().unwrap();

        // The scratch buffer was overwritten, the first block was not.
        assert_eq!(first.sequence(), 0);
        assert_eq!(first.sample_set_count(), 2);
        assert_eq!(f32::from_bits(first.words()[0]), 1.0);
        assert_eq!(second.sequence(), 1);
        assert_eq!(second.words().len(), 2);
        assert_eq!(f32::from_bits(second.words()[0]), 5.0);
    }

    #[test]
    fn test_device_error_is_propagated() {
        let mut device = ScriptedDevice::new(
            layout().channels().to_vec(),
            vec![ScriptedPoll::Fail(DeviceError::Disconnected)],
        );
        device.start_sampling(MeasurementType::Normal).unwrap();
        let mut fetcher = Fetcher::new(shared(device), &layout(), 16, Duration::ZERO);
        assert_eq!(
            fetcher.poll().unwrap_err(),
            PipelineError::DeviceCommunication(DeviceError::Disconnected)
        );
    }
}
