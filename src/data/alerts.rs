//! Temperature threshold alerting.
//!
//! Every temperature reading strictly above the configured threshold raises
//! an alert. There is no hysteresis or debounce: consecutive readings above
//! the threshold alert on every tick.

use chrono::{DateTime, Utc};

use super::reading::Reading;

/// Raised when a temperature reading exceeds the threshold.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemperatureAlert {
    /// The reading that crossed the threshold.
    pub value: f64,
    /// The threshold in effect when the reading was evaluated.
    pub threshold: f64,
    /// Capture time of the reading.
    pub captured_at: DateTime<Utc>,
}

impl std::fmt::Display for TemperatureAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "temperature {:.2}°C above threshold {:.2}°C",
            self.value, self.threshold
        )
    }
}

/// User-configured threshold evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThresholdMonitor {
    threshold: Option<f64>,
}

impl ThresholdMonitor {
    /// Create a monitor with an optional threshold.
    pub fn new(threshold: Option<f64>) -> Self {
        Self { threshold }
    }

    /// Current threshold, if alerting is enabled.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Set or clear the threshold.
    pub fn set_threshold(&mut self, threshold: Option<f64>) {
        self.threshold = threshold;
    }

    /// Evaluate a temperature reading.
    pub fn evaluate(&self, reading: &Reading) -> Option<TemperatureAlert> {
        let threshold = self.threshold?;
        (reading.value > threshold).then(|| TemperatureAlert {
            value: reading.value,
            threshold,
            captured_at: reading.captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reading::Unit;

    fn temp(value: f64) -> Reading {
        Reading::new(value, Unit::Celsius, Utc::now())
    }

    #[test]
    fn test_alert_fires_only_above_threshold() {
        let monitor = ThresholdMonitor::new(Some(30.0));
        let fired: Vec<f64> = [28.0, 31.0, 29.0]
            .iter()
            .filter_map(|v| monitor.evaluate(&temp(*v)))
            .map(|a| a.value)
            .collect();
        assert_eq!(fired, vec![31.0]);
    }

    #[test]
    fn test_no_debounce() {
        let monitor = ThresholdMonitor::new(Some(30.0));
        let fired = [31.0, 32.0, 29.0, 30.5]
            .iter()
            .filter(|v| monitor.evaluate(&temp(**v)).is_some())
            .count();
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_equal_to_threshold_does_not_fire() {
        let monitor = ThresholdMonitor::new(Some(30.0));
        assert!(monitor.evaluate(&temp(30.0)).is_none());
    }

    #[test]
    fn test_disabled_monitor() {
        let mut monitor = ThresholdMonitor::default();
        assert!(monitor.evaluate(&temp(100.0)).is_none());
        monitor.set_threshold(Some(50.0));
        assert_eq!(monitor.threshold(), Some(50.0));
        assert!(monitor.evaluate(&temp(100.0)).is_some());
    }
}
