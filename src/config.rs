//! Client configuration.

use std::time::Duration;

use crate::ble::scanner::DEFAULT_SCAN_DURATION;
use crate::data::characteristic::CharacteristicSpec;
use crate::error::{Error, Result};
use crate::poller::DEFAULT_POLL_INTERVAL;

/// Default capacity of the scan and session event channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for scanning, polling and alerting.
///
/// The defaults match the product: a 10 second scan window, a 1 second poll
/// cadence over temperature and humidity, and no alert threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// How long a scan pass runs before stopping itself.
    pub scan_duration: Duration,
    /// Interval between poll ticks.
    pub poll_interval: Duration,
    /// Characteristics read on every tick.
    pub characteristics: Vec<CharacteristicSpec>,
    /// Temperature above which an alert is raised.
    pub alert_threshold: Option<f64>,
    /// Capacity of the broadcast event channels.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_duration: DEFAULT_SCAN_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            characteristics: CharacteristicSpec::defaults(),
            alert_threshold: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Set the scan window.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the poll cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the polled characteristics.
    pub fn with_characteristics(mut self, characteristics: Vec<CharacteristicSpec>) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Set the initial alert threshold.
    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = Some(threshold);
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scan_duration.is_zero() {
            return Err(invalid("scan_duration", format!("{:?}", self.scan_duration)));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", format!("{:?}", self.poll_interval)));
        }
        if self.characteristics.is_empty() {
            return Err(invalid("characteristics", "[]".to_string()));
        }
        if let Some(threshold) = self.alert_threshold {
            if !threshold.is_finite() {
                return Err(invalid("alert_threshold", threshold.to_string()));
            }
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "0".to_string()));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: String) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value,
    }
}
