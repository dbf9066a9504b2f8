//! Counters shared by the workers of one measurement.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) polls: AtomicU64,
    pub(crate) blocks_enqueued: AtomicU64,
    pub(crate) blocks_dropped: AtomicU64,
    pub(crate) blocks_decoded: AtomicU64,
    pub(crate) format_mismatches: AtomicU64,
    pub(crate) batches_published: AtomicU64,
    pub(crate) sample_sets_decoded: AtomicU64,
    pub(crate) counter_discontinuities: AtomicU64,
    pub(crate) drift_warnings: AtomicU64,
    pub(crate) delivery_failures: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub polls: u64,
    pub blocks_enqueued: u64,
    pub blocks_dropped: u64,
    pub blocks_decoded: u64,
    pub format_mismatches: u64,
    pub batches_published: u64,
    pub sample_sets_decoded: u64,
    pub counter_discontinuities: u64,
    pub drift_warnings: u64,
    pub delivery_failures: u64,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            polls: get(&self.polls),
            blocks_enqueued: get(&self.blocks_enqueued),
            blocks_dropped: get(&self.blocks_dropped),
            blocks_decoded: get(&self.blocks_decoded),
            format_mismatches: get(&self.format_mismatches),
            batches_published: get(&self.batches_published),
            sample_sets_decoded: get(&self.sample_sets_decoded),
            counter_discontinuities: get(&self.counter_discontinuities),
            drift_warnings: get(&self.drift_warnings),
            delivery_failures: get(&self.delivery_failures),
        }
    }
}
