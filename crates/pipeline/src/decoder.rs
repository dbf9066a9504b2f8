//! Decoding of raw sample words into physical values
//!
//! Each channel gets a conversion chosen once from its descriptor when the
//! decoder is built. Raw words are interpreted per channel wire format:
//! - Float words are reinterpreted as `f32` and scaled to physical units
//! - Unsigned words (the counter) are reinterpreted bitwise and never scaled
//!
//! The decoder also feeds every counter value to the drift detector.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use eeg_types::{ChannelDescriptor, ChannelKind, ChannelLayout, DecodedSampleBatch, DeviceId, RawSampleBlock, WireFormat};
use tracing::{debug, info, warn};

use crate::control::{EventSink, PipelineEvent};
use crate::drift::{CounterDrift, DriftDetector};
use crate::error::DecodeError;
use crate::hub::SampleHub;
use crate::queue::{Next, QueueConsumer};
use crate::stats::PipelineStats;

/// Whether decoded values are converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Apply sensor calibration and physical exponents.
    Physical,
    /// Impedance readings: pass the raw float through unchanged.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Counter,
    Sensor { offset: f64, gain: f64, divisor: f64 },
    Scaled { divisor: f64 },
    Passthrough,
}

impl Conversion {
    fn plan(channel: &ChannelDescriptor, mode: ConversionMode) -> Self {
        if channel.wire_format == WireFormat::UnsignedInteger32 {
            return Conversion::Counter;
        }
        if mode == ConversionMode::Raw {
            return Conversion::Passthrough;
        }
        match (channel.kind, channel.sensor) {
            (ChannelKind::Aux, Some(sensor)) => Conversion::Sensor {
                offset: sensor.offset as f64,
                gain: sensor.gain as f64,
                divisor: 10f64.powi(sensor.exponent as i32),
            },
            _ => Conversion::Scaled {
                divisor: 10f64.powi(channel.physical_exponent as i32),
            },
        }
    }

    #[inline]
    fn apply(self, word: u32) -> f64 {
        let x = f32::from_bits(word) as f64;
        match self {
            Conversion::Counter | Conversion::Passthrough => x,
            Conversion::Sensor { offset, gain, divisor } => (x + offset) * gain / divisor,
            Conversion::Scaled { divisor } => x / divisor,
        }
    }
}

/// A decoded block plus the drift it revealed, if any.
#[derive(Debug)]
pub struct Decoded {
    pub batch: DecodedSampleBatch,
    pub drift: Option<CounterDrift>,
}

pub struct Decoder {
    layout: ChannelLayout,
    plan: Vec<Conversion>,
    detector: DriftDetector,
}

impl Decoder {
    pub fn new(device: DeviceId, layout: ChannelLayout, mode: ConversionMode) -> Self {
        let plan = layout
            .channels()
            .iter()
            .map(|c| Conversion::plan(c, mode))
            .collect();
        Self {
            layout,
            plan,
            detector: DriftDetector::new(device),
        }
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn discontinuities(&self) -> u64 {
        self.detector.discontinuities()
    }

    /// Decodes one raw block.
    ///
    /// The block must hold exactly `sample_set_count * channels_per_set` words;
    /// otherwise nothing is decoded and the drift detector is left untouched.
    pub fn decode(&mut self, block: &RawSampleBlock) -> Result<Decoded, DecodeError> {
        let channels = self.layout.channels_per_set();
        let sample_sets = block.sample_set_count() as usize;
        let expected = sample_sets * channels;
        if block.len() != expected {
            return Err(DecodeError::FormatMismatch {
                sequence: block.sequence(),
                sample_sets: block.sample_set_count(),
                channels,
                expected,
                actual: block.len(),
            });
        }

        let mut values = Vec::with_capacity(expected);
        for set in block.words().chunks_exact(channels) {
            values.extend(set.iter().zip(&self.plan).map(|(w, c)| c.apply(*w)));
        }

        let mut drift = None;
        if let Some(counter) = self.layout.counter_index() {
            for set in values.chunks_exact(channels) {
                if let Some(found) = self.detector.observe(set[counter]) {
                    drift = Some(found);
                }
            }
        }

        Ok(Decoded {
            batch: DecodedSampleBatch::new(block.sequence(), sample_sets, channels, values),
            drift,
        })
    }
}

/// Everything the decoder thread owns.
pub(crate) struct DecoderWorker {
    pub device: DeviceId,
    pub decoder: Decoder,
    pub queue: QueueConsumer,
    pub hub: Arc<SampleHub>,
    pub stats: Arc<PipelineStats>,
    pub events: EventSink,
    pub wait: Duration,
}

impl DecoderWorker {
    /// Decodes and publishes blocks until the queue is closed and drained.
    pub(crate) fn run(mut self) {
        info!(device = %self.device, "Decoder started");
        loop {
            match self.queue.next(self.wait) {
                Next::Block(block) => self.handle(block),
                Next::Empty => continue,
                Next::Closed => break,
            }
        }
        info!(
            device = %self.device,
            discontinuities = self.decoder.discontinuities(),
            "Decoder drained and stopped"
        );
    }

    fn handle(&mut self, block: RawSampleBlock) {
        let decoded = match self.decoder.decode(&block) {
            Ok(decoded) => decoded,
            Err(err) => {
                PipelineStats::bump(&self.stats.format_mismatches);
                warn!(device = %self.device, sequence = block.sequence(), "Skipping block: {}", err);
                self.events.emit(PipelineEvent::FormatMismatch {
                    device: self.device,
                    sequence: block.sequence(),
                    message: err.to_string(),
                });
                return;
            }
        };

        PipelineStats::bump(&self.stats.blocks_decoded);
        self.stats
            .sample_sets_decoded
            .fetch_add(decoded.batch.sample_set_count as u64, Ordering::Relaxed);
        self.stats
            .counter_discontinuities
            .store(self.decoder.discontinuities(), Ordering::Relaxed);

        if let Some(CounterDrift { previous, current }) = decoded.drift {
            PipelineStats::bump(&self.stats.drift_warnings);
            self.events.emit(PipelineEvent::CounterDrift {
                device: self.device,
                previous,
                current,
            });
        }

        let sequence = decoded.batch.sequence;
        let report = self.hub.publish(self.device, Arc::new(decoded.batch));
        PipelineStats::bump(&self.stats.batches_published);
        debug!(device = %self.device, sequence, delivered = report.delivered, "Batch published");

        for (consumer, err) in report.failures {
            PipelineStats::bump(&self.stats.delivery_failures);
            self.events.emit(PipelineEvent::ConsumerFailed {
                device: self.device,
                consumer,
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_types::SensorCalibration;
    use proptest::prelude::*;

    fn block(values: &[f32], sets: u32, sequence: u64) -> RawSampleBlock {
        let words: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        RawSampleBlock::copy_from(&words, sets, sequence)
    }

    fn eeg_layout(channels: usize, exponent: i16) -> ChannelLayout {
        ChannelLayout::new(
            (0..channels)
                .map(|i| ChannelDescriptor::float(i, ChannelKind::Eeg, exponent))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_exponent_zero_round_trips() {
        let mut decoder = Decoder::new(DeviceId(0), eeg_layout(2, 0), ConversionMode::Physical);
        let decoded = decoder.decode(&block(&[1.5, -2.25, 0.125, 8.0], 2, 0)).unwrap();
        assert_eq!(decoded.batch.values, vec![1.5, -2.25, 0.125, 8.0]);
        assert!(decoded.drift.is_none());
    }

    #[test]
    fn test_physical_exponent_scales() {
        let mut decoder = Decoder::new(DeviceId(0), eeg_layout(1, 2), ConversionMode::Physical);
        let decoded = decoder.decode(&block(&[250.0], 1, 0)).unwrap();
        assert_eq!(decoded.batch.values, vec![2.5]);
    }

    #[test]
    fn test_counter_word_is_reinterpreted() {
        let layout = ChannelLayout::new(vec![
            ChannelDescriptor::float(0, ChannelKind::Eeg, 6),
            ChannelDescriptor::counter(1),
        ])
        .unwrap();
        let mut decoder = Decoder::new(DeviceId(0), layout, ConversionMode::Physical);
        let raw = RawSampleBlock::copy_from(&[0.0f32.to_bits(), 0x3F80_0000], 1, 0);
        let decoded = decoder.decode(&raw).unwrap();
        assert_eq!(decoded.batch.values[1], 1.0);
    }

    #[test]
    fn test_aux_sensor_calibration() {
        let aux = ChannelDescriptor::float(0, ChannelKind::Aux, 0).with_sensor(SensorCalibration {
            gain: 3.0,
            offset: 2.0,
            exponent: 1,
        });
        let mut decoder = Decoder::new(DeviceId(0), ChannelLayout::new(vec![aux]).unwrap(), ConversionMode::Physical);
        let decoded = decoder.decode(&block(&[5.0], 1, 0)).unwrap();
        assert!((decoded.batch.values[0] - 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_sensor_ignored_on_non_aux_channel() {
        let eeg = ChannelDescriptor::float(0, ChannelKind::Eeg, 0).with_sensor(SensorCalibration {
            gain: 3.0,
            offset: 2.0,
            exponent: 1,
        });
        let mut decoder = Decoder::new(DeviceId(0), ChannelLayout::new(vec![eeg]).unwrap(), ConversionMode::Physical);
        assert_eq!(decoder.decode(&block(&[5.0], 1, 0)).unwrap().batch.values, vec![5.0]);
    }

    #[test]
    fn test_raw_mode_passes_values_through() {
        let mut decoder = Decoder::new(DeviceId(0), eeg_layout(2, 6), ConversionMode::Raw);
        let decoded = decoder.decode(&block(&[12.5, 40.0], 1, 0)).unwrap();
        assert_eq!(decoded.batch.values, vec![12.5, 40.0]);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut decoder = Decoder::new(DeviceId(0), eeg_layout(3, 0), ConversionMode::Physical);
        let err = decoder.decode(&block(&[1.0; 5], 2, 9)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FormatMismatch {
                sequence: 9,
                sample_sets: 2,
                channels: 3,
                expected: 6,
                actual: 5,
            }
        );
    }

    #[test]
    fn test_drift_spans_blocks() {
        let layout = ChannelLayout::new(vec![ChannelDescriptor::counter(0)]).unwrap();
        let mut decoder = Decoder::new(DeviceId(0), layout, ConversionMode::Physical);
        assert!(decoder.decode(&block(&[1.0, 2.0, 3.0], 3, 0)).unwrap().drift.is_none());
        let second = decoder.decode(&block(&[5.0, 6.0], 2, 1)).unwrap();
        assert_eq!(
            second.drift,
            Some(CounterDrift {
                previous: 3.0,
                current: 5.0
            })
        );
        assert_eq!(decoder.discontinuities(), 1);
    }

    proptest! {
        #[test]
        fn test_decode_preserves_length_and_order(
            channels in 1usize..8,
            sets in 0usize..32,
            seed in any::<u32>(),
        ) {
            let values: Vec<f32> = (0..channels * sets)
                .map(|i| ((i as u32).wrapping_mul(2_654_435_761) ^ seed) as f32 / 1024.0)
                .collect();
            let mut decoder = Decoder::new(DeviceId(0), eeg_layout(channels, 0), ConversionMode::Physical);
            let decoded = decoder.decode(&block(&values, sets as u32, 3)).unwrap();

            prop_assert_eq!(decoded.batch.len(), channels * sets);
            prop_assert_eq!(decoded.batch.sample_set_count, sets);
            for (got, want) in decoded.batch.values.iter().zip(&values) {
                prop_assert_eq!(*got, *want as f64);
            }
        }
    }
}
