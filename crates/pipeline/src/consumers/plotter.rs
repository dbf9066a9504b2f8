//! Rolling per-channel window for a live display.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use eeg_types::{DecodedSampleBatch, DeviceId};

use crate::error::ConsumerError;
use crate::hub::Consumer;

/// Keeps the latest `window` values of every channel.
pub struct PlotterConsumer {
    name: String,
    window: usize,
    channels: Mutex<Vec<VecDeque<f64>>>,
}

impl PlotterConsumer {
    pub fn new(name: impl Into<String>, window: usize) -> Self {
        Self {
            name: name.into(),
            window: window.max(1),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current window, one `Vec` per channel, oldest value first.
    pub fn snapshot(&self) -> Vec<Vec<f64>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.iter().copied().collect())
            .collect()
    }
}

impl Consumer for PlotterConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_batch(&self, _device: DeviceId, batch: &Arc<DecodedSampleBatch>) -> Result<(), ConsumerError> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels.len() != batch.channels_per_set {
            // Layout changed with a new measurement.
            *channels = vec![VecDeque::with_capacity(self.window); batch.channels_per_set];
        }
        for set in batch.sample_sets() {
            for (trace, value) in channels.iter_mut().zip(set) {
                if trace.len() == self.window {
                    trace.pop_front();
                }
                trace.push_back(*value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_latest_values() {
        let plotter = PlotterConsumer::new("plot", 3);
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let batch = Arc::new(DecodedSampleBatch::new(0, 5, 2, values));
        plotter.on_batch(DeviceId(0), &batch).unwrap();

        let snapshot = plotter.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0], vec![4.0, 6.0, 8.0]);
        assert_eq!(snapshot[1], vec![5.0, 7.0, 9.0]);
    }
}
