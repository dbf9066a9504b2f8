//! Pipeline configuration types and validation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Longest wait a worker may block for before re-checking for stop.
pub const MAX_RESPONSIVE_WAIT_MS: u64 = 200;

/// Tunables of a sampling pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cadence of the fetcher's device polls
    pub poll_interval_ms: u64,
    /// Capacity of the transfer queue, in raw blocks
    pub queue_capacity: usize,
    /// How long the fetcher waits on a full queue before dropping the oldest block
    pub offer_timeout_ms: u64,
    /// How long the decoder waits on an empty queue before re-checking
    pub decoder_wait_ms: u64,
    /// Size of the fetcher's scratch buffer, in sample sets
    pub max_sample_sets_per_poll: usize,
    /// Pin the fetcher and decoder threads to separate cores
    pub pin_workers: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            queue_capacity: 50,
            offer_timeout_ms: 50,
            decoder_wait_ms: 50,
            max_sample_sets_per_poll: 4096,
            pin_workers: false,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How long one device read may block. Capped so that a slow poll
    /// cadence never delays a stop.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.min(MAX_RESPONSIVE_WAIT_MS))
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn decoder_wait(&self) -> Duration {
        Duration::from_millis(self.decoder_wait_ms)
    }

    /// Checks the configuration before a pipeline is built from it.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }
        if self.max_sample_sets_per_poll == 0 {
            return Err(invalid("max_sample_sets_per_poll must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be at least 1"));
        }
        for (name, value) in [
            ("offer_timeout_ms", self.offer_timeout_ms),
            ("decoder_wait_ms", self.decoder_wait_ms),
        ] {
            if value == 0 || value > MAX_RESPONSIVE_WAIT_MS {
                return Err(invalid(&format!(
                    "{} must be between 1 and {} ms, got {}",
                    name, MAX_RESPONSIVE_WAIT_MS, value
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> PipelineError {
    PipelineError::InvalidConfiguration {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.queue_capacity, 50);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "queue_capacity": 8 }"#).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_fetch_timeout_is_capped() {
        let config = PipelineConfig {
            poll_interval_ms: 5000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(MAX_RESPONSIVE_WAIT_MS));

        let config = PipelineConfig {
            poll_interval_ms: 20,
            ..Default::default()
        };
        assert_eq!(config.fetch_timeout(), Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_unresponsive_waits() {
        let config = PipelineConfig {
            decoder_wait_ms: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration { .. })
        ));

        let config = PipelineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
