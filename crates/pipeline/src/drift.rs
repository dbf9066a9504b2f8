//! Sample loss detection on the device counter channel.

use eeg_types::DeviceId;
use tracing::warn;

/// First counter discontinuity of a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterDrift {
    pub previous: f64,
    pub current: f64,
}

/// Watches consecutive counter values for gaps.
///
/// Every discontinuity is counted, but only the first one of a measurement is
/// reported; a fresh detector is built for each measurement.
#[derive(Debug)]
pub struct DriftDetector {
    device: DeviceId,
    last: Option<f64>,
    latched: bool,
    discontinuities: u64,
}

impl DriftDetector {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            last: None,
            latched: false,
            discontinuities: 0,
        }
    }

    /// Feeds the next counter value in arrival order.
    pub fn observe(&mut self, current: f64) -> Option<CounterDrift> {
        let previous = match self.last.replace(current) {
            Some(previous) => previous,
            None => return None,
        };

        if current - previous == 1.0 {
            return None;
        }

        self.discontinuities += 1;
        if self.latched {
            return None;
        }
        self.latched = true;
        warn!(
            device = %self.device,
            previous,
            current,
            "Counter discontinuity, samples were lost or the device clock drifted"
        );
        Some(CounterDrift { previous, current })
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    pub fn has_warned(&self) -> bool {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(values: &[f64]) -> (DriftDetector, Vec<CounterDrift>) {
        let mut detector = DriftDetector::new(DeviceId(0));
        let warnings = values.iter().filter_map(|v| detector.observe(*v)).collect();
        (detector, warnings)
    }

    #[test]
    fn test_contiguous_counter_is_silent() {
        let (detector, warnings) = run(&[1.0, 2.0, 3.0, 4.0]);
        assert!(warnings.is_empty());
        assert_eq!(detector.discontinuities(), 0);
    }

    #[test]
    fn test_single_gap_warns_once() {
        let (detector, warnings) = run(&[1.0, 2.0, 3.0, 5.0, 6.0]);
        assert_eq!(
            warnings,
            vec![CounterDrift {
                previous: 3.0,
                current: 5.0
            }]
        );
        assert_eq!(detector.discontinuities(), 1);
    }

    #[test]
    fn test_later_gaps_are_counted_not_reported() {
        let (detector, warnings) = run(&[1.0, 3.0, 4.0, 9.0, 2.0]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(detector.discontinuities(), 3);
        assert!(detector.has_warned());
    }

    #[test]
    fn test_repeated_value_is_a_discontinuity() {
        let (_, warnings) = run(&[7.0, 7.0]);
        assert_eq!(warnings.len(), 1);
    }
}
