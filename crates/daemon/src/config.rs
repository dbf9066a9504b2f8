use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use eeg_sensor::MockDeviceConfig;
use eeg_types::MeasurementType;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "sampling_daemon", about = "Samples a device and fans the data out to consumers")]
pub struct Args {
    /// JSON configuration file, defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Skip one counter value every N sample sets to simulate lost samples
    #[arg(long, value_name = "N")]
    pub mock_loss: Option<u64>,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration_secs: Option<u64>,
    /// Run an impedance measurement instead of a normal one
    #[arg(long)]
    pub impedance: bool,
}

/// Configuration for the daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Key of the device in the distribution hub
    pub device_id: u32,
    pub pipeline: PipelineConfig,
    /// The simulated amplifier
    pub device: MockDeviceConfig,
    pub measurement: MeasurementType,
    /// Directory for CSV recordings; recording is off when unset
    pub csv_path: Option<PathBuf>,
    /// Sample sets kept per channel for the live view
    pub plot_window: usize,
    /// Batches buffered for the streaming task
    pub stream_capacity: usize,
    /// Capacity of the pipeline event channel shared by every device
    pub event_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            pipeline: PipelineConfig::default(),
            device: MockDeviceConfig::default(),
            measurement: MeasurementType::Normal,
            csv_path: None,
            plot_window: 500,
            stream_capacity: 64,
            event_capacity: pipeline::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;
        anyhow::ensure!(self.event_capacity > 0, "event_capacity must be at least 1");
        anyhow::ensure!(self.stream_capacity > 0, "stream_capacity must be at least 1");
        Ok(())
    }

    /// Command line flags take precedence over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(every) = args.mock_loss {
            self.device.skip_counter_every = Some(every);
        }
        if args.impedance {
            self.measurement = MeasurementType::Impedance;
        }
    }
}

/// Load daemon configuration from a JSON file
pub fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Could not read configuration file at '{}'", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Could not parse configuration file at '{}'", path.display()))?;
    config.validate()?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "device": { "eeg_channels": 2 }, "pipeline": { "queue_capacity": 10 }, "measurement": "impedance" }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.device.eeg_channels, 2);
        assert_eq!(config.device.sample_rate, 500);
        assert_eq!(config.pipeline.queue_capacity, 10);
        assert_eq!(config.measurement, MeasurementType::Impedance);
        assert_eq!(config.plot_window, 500);
    }

    #[test]
    fn test_invalid_pipeline_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "pipeline": { "queue_capacity": 0 } }"#).unwrap();
        assert!(load_config(&path).is_err());
        assert!(load_config(&dir.path().join("missing.json")).is_err());

        fs::write(&path, r#"{ "event_capacity": 0 }"#).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("event_capacity"));
    }

    #[test]
    fn test_args_override_file() {
        let args = Args::parse_from(["sampling_daemon", "--mock-loss", "100", "--impedance"]);
        let mut config = DaemonConfig::default();
        config.apply_args(&args);
        assert_eq!(config.device.skip_counter_every, Some(100));
        assert_eq!(config.measurement, MeasurementType::Impedance);
    }
}
