//! Sample containers exchanged between the device, the pipeline and consumers.

use serde::{Deserialize, Serialize};

/// Identifies a device in the distribution hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

/// The kind of measurement a device is asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    /// Regular sampling of the enabled channels, converted to physical units.
    #[default]
    Normal,
    /// Impedance measurement on the impedance channels; values are passed through.
    Impedance,
}

/// Interleaved, undecoded sample words for one or more consecutive sample sets.
///
/// A block always owns its words. The device's acquisition buffer is reused on
/// every poll, so a block is only ever built by copying out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSampleBlock {
    sequence: u64,
    sample_set_count: u32,
    words: Vec<u32>,
}

impl RawSampleBlock {
    /// Copies `words` out of a scratch buffer.
    pub fn copy_from(words: &[u32], sample_set_count: u32, sequence: u64) -> Self {
        Self {
            sequence,
            sample_set_count,
            words: words.to_vec(),
        }
    }

    /// Position of this block in the order the fetcher produced it.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sample_set_count(&self) -> u32 {
        self.sample_set_count
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Decoded values of one raw block, row-major by sample set then channel.
///
/// Batches are immutable and shared read-only between all consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSampleBatch {
    pub sequence: u64,
    pub sample_set_count: usize,
    pub channels_per_set: usize,
    pub values: Vec<f64>,
}

impl DecodedSampleBatch {
    pub fn new(sequence: u64, sample_set_count: usize, channels_per_set: usize, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), sample_set_count * channels_per_set);
        Self {
            sequence,
            sample_set_count,
            channels_per_set,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All channel values of sample set `i`.
    pub fn sample_set(&self, i: usize) -> Option<&[f64]> {
        if i >= self.sample_set_count {
            return None;
        }
        let start = i * self.channels_per_set;
        Some(&self.values[start..start + self.channels_per_set])
    }

    /// Iterates over every sample set in order.
    pub fn sample_sets(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on zero, an empty batch may have no channels
        self.values.chunks(self.channels_per_set.max(1))
    }

    /// The values of channel `j` across all sample sets.
    pub fn channel(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        let valid = j < self.channels_per_set;
        self.values
            .iter()
            .skip(j)
            .step_by(self.channels_per_set.max(1))
            .take(if valid { self.sample_set_count } else { 0 })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_is_independent() {
        let mut scratch = vec![1u32, 2, 3, 4];
        let block = RawSampleBlock::copy_from(&scratch[..2], 1, 7);
        scratch[0] = 99;
        assert_eq!(block.words(), &[1, 2]);
        assert_eq!(block.sequence(), 7);
        assert_eq!(block.sample_set_count(), 1);
    }

    #[test]
    fn test_batch_accessors() {
        let batch = DecodedSampleBatch::new(0, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(batch.sample_set(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(batch.sample_set(2), None);
        assert_eq!(batch.channel(1).collect::<Vec<_>>(), vec![2.0, 5.0]);
        assert_eq!(batch.channel(3).count(), 0);
        assert_eq!(batch.sample_sets().count(), 2);
    }
}
