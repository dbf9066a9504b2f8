//! Channel descriptors and the immutable channel layout of a measurement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a channel's sample word is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// The word is an IEEE-754 single precision float.
    FloatIeee754,
    /// The word carries a 32-bit unsigned value (counter and status channels).
    UnsignedInteger32,
}

/// Functional class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Eeg,
    Bip,
    Aux,
    Counter,
    Status,
    Other,
}

/// Calibration of an external sensor plugged into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub gain: f32,
    pub offset: f32,
    /// Power-of-ten scale applied after gain and offset.
    pub exponent: i16,
}

/// Static description of one active channel.
///
/// Descriptors are built once from the device configuration before sampling
/// starts and never change while a measurement is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Position of the channel inside a sample set.
    pub index: usize,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub wire_format: WireFormat,
    /// Power-of-ten scale converting the raw reading to physical units.
    #[serde(default)]
    pub physical_exponent: i16,
    pub kind: ChannelKind,
    #[serde(default)]
    pub sensor: Option<SensorCalibration>,
}

impl ChannelDescriptor {
    /// A float channel with the given kind and exponent.
    pub fn float(index: usize, kind: ChannelKind, physical_exponent: i16) -> Self {
        Self {
            index,
            name: format!("CH{}", index + 1),
            unit: String::new(),
            wire_format: WireFormat::FloatIeee754,
            physical_exponent,
            kind,
            sensor: None,
        }
    }

    /// The sample counter channel.
    pub fn counter(index: usize) -> Self {
        Self {
            index,
            name: "COUNTER".to_string(),
            unit: "-".to_string(),
            wire_format: WireFormat::UnsignedInteger32,
            physical_exponent: 0,
            kind: ChannelKind::Counter,
            sensor: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>, unit: impl Into<String>) -> Self {
        self.name = name.into();
        self.unit = unit.into();
        self
    }

    pub fn with_sensor(mut self, sensor: SensorCalibration) -> Self {
        self.sensor = Some(sensor);
        self
    }
}

/// Errors raised when a channel list cannot describe a measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("channel list is empty")]
    Empty,
    #[error("channel at position {position} declares index {index}")]
    IndexMismatch { position: usize, index: usize },
}

/// The channel list of a running measurement.
///
/// Cheap to clone and shared by the fetcher and the decoder without locking.
#[derive(Debug, Clone)]
pub struct ChannelLayout {
    channels: Arc<[ChannelDescriptor]>,
    counter_index: Option<usize>,
}

impl ChannelLayout {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Result<Self, LayoutError> {
        if channels.is_empty() {
            return Err(LayoutError::Empty);
        }
        for (position, channel) in channels.iter().enumerate() {
            if channel.index != position {
                return Err(LayoutError::IndexMismatch {
                    position,
                    index: channel.index,
                });
            }
        }

        // By convention the counter is the last active channel.
        let counter_index = channels
            .iter()
            .rposition(|c| c.kind == ChannelKind::Counter)
            .or_else(|| {
                channels
                    .last()
                    .filter(|c| c.wire_format == WireFormat::UnsignedInteger32)
                    .map(|c| c.index)
            });

        Ok(Self {
            channels: channels.into(),
            counter_index,
        })
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn channels_per_set(&self) -> usize {
        self.channels.len()
    }

    pub fn counter_index(&self) -> Option<usize> {
        self.counter_index
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_last_counter_channel() {
        let layout = ChannelLayout::new(vec![
            ChannelDescriptor::float(0, ChannelKind::Eeg, 0),
            ChannelDescriptor::float(1, ChannelKind::Eeg, 0),
            ChannelDescriptor::counter(2),
        ])
        .unwrap();
        assert_eq!(layout.channels_per_set(), 3);
        assert_eq!(layout.counter_index(), Some(2));
    }

    #[test]
    fn test_trailing_unsigned_channel_is_counter() {
        let mut status = ChannelDescriptor::float(1, ChannelKind::Status, 0);
        status.wire_format = WireFormat::UnsignedInteger32;
        let layout =
            ChannelLayout::new(vec![ChannelDescriptor::float(0, ChannelKind::Eeg, 0), status])
                .unwrap();
        assert_eq!(layout.counter_index(), Some(1));
    }

    #[test]
    fn test_no_counter() {
        let layout = ChannelLayout::new(vec![ChannelDescriptor::float(0, ChannelKind::Eeg, 0)])
            .unwrap();
        assert_eq!(layout.counter_index(), None);
    }

    #[test]
    fn test_invalid_layouts() {
        assert_eq!(ChannelLayout::new(vec![]).unwrap_err(), LayoutError::Empty);
        let err = ChannelLayout::new(vec![ChannelDescriptor::float(3, ChannelKind::Eeg, 0)])
            .unwrap_err();
        assert_eq!(err, LayoutError::IndexMismatch { position: 0, index: 3 });
    }
}
