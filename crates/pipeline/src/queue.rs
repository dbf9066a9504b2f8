//! Bounded transfer queue between the fetcher and the decoder
//!
//! A single-producer/single-consumer FIFO of raw blocks on top of a bounded
//! flume channel. When the queue stays full for longer than the offer timeout
//! the producer discards the oldest resident block to admit the new one, so
//! end-to-end latency stays bounded under sustained backpressure. Every such
//! drop is reported back to the caller, which counts it.

use std::time::Duration;

use eeg_types::RawSampleBlock;
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a successful offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// The queue was full; the block with `dropped_sequence` was discarded.
    AcceptedAfterDrop { dropped_sequence: u64 },
}

/// The consumer side is gone; the rejected block is handed back.
#[derive(Error, Debug)]
#[error("transfer queue is closed")]
pub struct QueueClosed(pub RawSampleBlock);

/// Result of waiting for the next block.
#[derive(Debug)]
pub enum Next {
    Block(RawSampleBlock),
    /// Nothing arrived within the wait.
    Empty,
    /// The producer is gone and every resident block has been delivered.
    Closed,
}

/// Creates a queue holding at most `capacity` blocks.
pub fn transfer_queue(capacity: usize, offer_timeout: Duration) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = flume::bounded(capacity);
    (
        QueueProducer {
            tx,
            evict_rx: rx.clone(),
            offer_timeout,
        },
        QueueConsumer { rx },
    )
}

/// Sending half. Not `Clone`: the queue has exactly one producer, and dropping
/// it is how the queue stops accepting offers.
pub struct QueueProducer {
    tx: Sender<RawSampleBlock>,
    // Only used to discard the oldest block on overflow.
    evict_rx: Receiver<RawSampleBlock>,
    offer_timeout: Duration,
}

impl QueueProducer {
    /// Enqueues `block`, waiting up to the offer timeout for room.
    pub fn offer(&mut self, block: RawSampleBlock) -> Result<Offer, QueueClosed> {
        let mut block = match self.tx.send_timeout(block, self.offer_timeout) {
            Ok(()) => return Ok(Offer::Accepted),
            Err(SendTimeoutError::Disconnected(block)) => return Err(QueueClosed(block)),
            Err(SendTimeoutError::Timeout(block)) => block,
        };

        // `evict_rx` keeps the channel connected, so check for the real consumer.
        if self.tx.receiver_count() <= 1 {
            return Err(QueueClosed(block));
        }

        let mut dropped_sequence = None;
        loop {
            if dropped_sequence.is_none() {
                if let Ok(oldest) = self.evict_rx.try_recv() {
                    warn!(
                        sequence = oldest.sequence(),
                        "Transfer queue full for {:?}, dropped oldest block",
                        self.offer_timeout
                    );
                    dropped_sequence = Some(oldest.sequence());
                }
            }
            match self.tx.try_send(block) {
                Ok(()) => break,
                Err(TrySendError::Full(rejected)) => block = rejected,
                Err(TrySendError::Disconnected(rejected)) => return Err(QueueClosed(rejected)),
            }
        }

        Ok(match dropped_sequence {
            Some(dropped_sequence) => Offer::AcceptedAfterDrop { dropped_sequence },
            // The consumer freed a slot between the timeout and the eviction.
            None => Offer::Accepted,
        })
    }

    pub fn resident(&self) -> usize {
        self.tx.len()
    }
}

impl Drop for QueueProducer {
    fn drop(&mut self) {
        debug!(resident = self.tx.len(), "Transfer queue closed for new offers");
    }
}

/// Receiving half, owned by the decoder.
pub struct QueueConsumer {
    rx: Receiver<RawSampleBlock>,
}

impl QueueConsumer {
    /// Waits up to `wait` for the next block in FIFO order.
    pub fn next(&self, wait: Duration) -> Next {
        match self.rx.recv_timeout(wait) {
            Ok(block) => Next::Block(block),
            Err(RecvTimeoutError::Timeout) => Next::Empty,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }
}
