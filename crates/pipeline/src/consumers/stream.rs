//! Forwards batches to a streaming task over a bounded channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eeg_types::{DecodedSampleBatch, DeviceId};
use flume::{Receiver, Sender, TrySendError};

use crate::error::ConsumerError;
use crate::hub::Consumer;

/// Hands every batch to a receiver owned by another task. Never blocks the
/// decoder: a full channel is reported as backpressure and the batch is not
/// forwarded.
pub struct StreamConsumer {
    name: String,
    tx: Sender<Arc<DecodedSampleBatch>>,
    forwarded: AtomicU64,
}

impl StreamConsumer {
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, Receiver<Arc<DecodedSampleBatch>>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
                forwarded: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

impl Consumer for StreamConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_batch(&self, _device: DeviceId, batch: &Arc<DecodedSampleBatch>) -> Result<(), ConsumerError> {
        match self.tx.try_send(batch.clone()) {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ConsumerError::Backpressure(format!(
                "stream buffer full, batch {} not forwarded",
                batch.sequence
            ))),
            Err(TrySendError::Disconnected(_)) => Err(ConsumerError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_stream_reports_backpressure() {
        let (stream, rx) = StreamConsumer::channel("ws", 1);
        let batch = Arc::new(DecodedSampleBatch::new(0, 1, 1, vec![1.0]));

        stream.on_batch(DeviceId(0), &batch).unwrap();
        assert!(matches!(
            stream.on_batch(DeviceId(0), &batch),
            Err(ConsumerError::Backpressure(_))
        ));
        assert!(Arc::ptr_eq(&rx.try_recv().unwrap(), &batch));

        drop(rx);
        assert_eq!(stream.on_batch(DeviceId(0), &batch), Err(ConsumerError::Closed));
        assert_eq!(stream.forwarded(), 1);
    }
}
