use std::time::{Duration, Instant};

use eeg_types::{ChannelDescriptor, ChannelKind, MeasurementType, SensorCalibration};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::mock_data_generator::EegGenerator;
use crate::types::{DeviceError, DeviceHandle, DeviceStatus, Fetched};

/// Configuration of the simulated amplifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDeviceConfig {
    /// Target sample rate in Hz
    pub sample_rate: u32,
    pub eeg_channels: usize,
    pub aux_channels: usize,
    /// Sensor attached to every AUX channel
    pub aux_sensor: Option<SensorCalibration>,
    /// Append a sample counter as the last channel
    pub counter: bool,
    /// Skip one counter value every N sample sets, to simulate lost samples
    pub skip_counter_every: Option<u64>,
    /// Fail every fetch after this many polls, to simulate a dropped link
    pub fail_after_polls: Option<u64>,
    pub seed: u64,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 500,
            eeg_channels: 8,
            aux_channels: 1,
            aux_sensor: Some(SensorCalibration {
                gain: 100.0,
                offset: 0.0,
                exponent: 0,
            }),
            counter: true,
            skip_counter_every: None,
            fail_after_polls: None,
            seed: 0x5A6A,
        }
    }
}

/// A simulated amplifier that does not access any hardware.
///
/// Samples become available at the configured rate of wall-clock time, so a
/// fetcher polling slower than the sample rate receives multi-set blocks.
pub struct MockDevice {
    config: MockDeviceConfig,
    status: DeviceStatus,
    generator: EegGenerator,
    started_at: Option<Instant>,
    produced: u64,
    counter: u64,
    polls: u64,
}

impl MockDevice {
    pub fn new(config: MockDeviceConfig) -> Result<Self, DeviceError> {
        if config.sample_rate == 0 {
            return Err(DeviceError::Configuration(
                "sample_rate must be positive".to_string(),
            ));
        }
        if config.eeg_channels + config.aux_channels == 0 {
            return Err(DeviceError::Configuration(
                "At least one channel must be configured".to_string(),
            ));
        }

        let generator = EegGenerator::new(config.sample_rate, config.eeg_channels, config.seed);
        info!("MockDevice created with config: {:?}", config);

        Ok(Self {
            config,
            status: DeviceStatus::Connected,
            generator,
            started_at: None,
            produced: 0,
            counter: 0,
            polls: 0,
        })
    }

    fn normal_channels(&self) -> Vec<ChannelDescriptor> {
        let mut channels = Vec::new();
        for i in 0..self.config.eeg_channels {
            channels.push(
                ChannelDescriptor::float(channels.len(), ChannelKind::Eeg, -6)
                    .with_name(format!("EEG{}", i + 1), "uV"),
            );
        }
        for i in 0..self.config.aux_channels {
            let mut aux = ChannelDescriptor::float(channels.len(), ChannelKind::Aux, 0)
                .with_name(format!("AUX{}", i + 1), "V");
            if let Some(sensor) = self.config.aux_sensor {
                aux = aux.with_sensor(sensor);
            }
            channels.push(aux);
        }
        if self.config.counter {
            channels.push(ChannelDescriptor::counter(channels.len()));
        }
        channels
    }

    fn impedance_channels(&self) -> Vec<ChannelDescriptor> {
        (0..self.config.eeg_channels)
            .map(|i| {
                ChannelDescriptor::float(i, ChannelKind::Eeg, 0)
                    .with_name(format!("EEG{}", i + 1), "kOhm")
            })
            .collect()
    }

    fn write_sample_set(&mut self, measurement: MeasurementType, out: &mut [u32]) {
        let t_secs = self.produced as f32 / self.config.sample_rate as f32;
        let mut pos = 0;
        match measurement {
            MeasurementType::Normal => {
                for ch in 0..self.config.eeg_channels {
                    out[pos] = self.generator.next_sample(ch).to_bits();
                    pos += 1;
                }
                for _ in 0..self.config.aux_channels {
                    out[pos] = self.generator.aux_sample(t_secs).to_bits();
                    pos += 1;
                }
                if self.config.counter {
                    self.counter += 1;
                    if let Some(every) = self.config.skip_counter_every {
                        if every > 0 && self.counter % every == 0 {
                            self.counter += 1;
                        }
                    }
                    out[pos] = (self.counter as f32).to_bits();
                }
            }
            MeasurementType::Impedance => {
                for ch in 0..self.config.eeg_channels {
                    out[pos] = self.generator.impedance_sample(ch).to_bits();
                    pos += 1;
                }
            }
        }
        self.produced += 1;
    }
}

impl DeviceHandle for MockDevice {
    fn channels(&self, measurement: MeasurementType) -> Result<Vec<ChannelDescriptor>, DeviceError> {
        Ok(match measurement {
            MeasurementType::Normal => self.normal_channels(),
            MeasurementType::Impedance => self.impedance_channels(),
        })
    }

    fn start_sampling(&mut self, measurement: MeasurementType) -> Result<(), DeviceError> {
        if let DeviceStatus::Sampling(_) = self.status {
            return Err(DeviceError::AlreadySampling);
        }
        self.started_at = Some(Instant::now());
        self.produced = 0;
        self.counter = 0;
        self.polls = 0;
        self.status = DeviceStatus::Sampling(measurement);
        info!("MockDevice started {:?} measurement", measurement);
        Ok(())
    }

    fn stop_sampling(&mut self) -> Result<(), DeviceError> {
        if self.status != DeviceStatus::Connected {
            info!("MockDevice stopped after {} sample sets", self.produced);
        }
        self.started_at = None;
        self.status = DeviceStatus::Connected;
        Ok(())
    }

    fn fetch_block(&mut self, buffer: &mut [u32], _timeout: Duration) -> Result<Fetched, DeviceError> {
        let measurement = match &self.status {
            DeviceStatus::Sampling(m) => *m,
            DeviceStatus::Faulted => return Err(DeviceError::Disconnected),
            DeviceStatus::Connected => return Err(DeviceError::NotSampling),
        };

        self.polls += 1;
        if let Some(limit) = self.config.fail_after_polls {
            if self.polls > limit {
                warn!("MockDevice simulating link loss after {} polls", limit);
                self.status = DeviceStatus::Faulted;
                return Err(DeviceError::Disconnected);
            }
        }

        let width = self.channels(measurement)?.len();
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let due = (elapsed.as_secs_f64() * self.config.sample_rate as f64) as u64;
        let capacity = (buffer.len() / width) as u64;
        let sets = due.saturating_sub(self.produced).min(capacity) as usize;

        for i in 0..sets {
            let start = i * width;
            self.write_sample_set(measurement, &mut buffer[start..start + width]);
        }
        if sets > 0 {
            debug!("MockDevice produced {} sample sets", sets);
        }

        Ok(Fetched {
            sample_sets: sets as u32,
            words: sets * width,
        })
    }
}
