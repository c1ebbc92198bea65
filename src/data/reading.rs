//! Decoded sensor readings and their per-metric history.

use chrono::{DateTime, Utc};

use crate::utils::celsius_to_fahrenheit;

/// A physical quantity measured by the sensor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Metric {
    /// Ambient temperature.
    Temperature,
    /// Relative humidity.
    Humidity,
}

impl Metric {
    /// All metrics the sensor tag exposes.
    pub const ALL: [Metric; 2] = [Metric::Temperature, Metric::Humidity];

    /// The unit the firmware reports this metric in.
    pub fn unit(&self) -> Unit {
        match self {
            Self::Temperature => Unit::Celsius,
            Self::Humidity => Unit::RelativeHumidity,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temperature => write!(f, "temperature"),
            Self::Humidity => write!(f, "humidity"),
        }
    }
}

/// Unit tag attached to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Unit {
    /// Degrees Celsius.
    Celsius,
    /// Percent relative humidity.
    RelativeHumidity,
}

impl Unit {
    /// Short display symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::RelativeHumidity => "%RH",
        }
    }
}

/// A single decoded value captured from the sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// The physical value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: Unit,
    /// When the read completed.
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// Create a new reading.
    pub fn new(value: f64, unit: Unit, captured_at: DateTime<Utc>) -> Self {
        Self {
            value,
            unit,
            captured_at,
        }
    }

    /// Value in Fahrenheit, for temperature readings only.
    pub fn fahrenheit(&self) -> Option<f64> {
        match self.unit {
            Unit::Celsius => Some(celsius_to_fahrenheit(self.value)),
            Unit::RelativeHumidity => None,
        }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}{}", self.value, self.unit.symbol())
    }
}

/// Append-only sequence of readings for one metric.
///
/// Lives for the duration of a single connection session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingHistory {
    metric: Metric,
    readings: Vec<Reading>,
}

impl ReadingHistory {
    /// Create an empty history for a metric.
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            readings: Vec::new(),
        }
    }

    /// The metric this history tracks.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Append a reading.
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// The most recent reading.
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    /// All readings, oldest first.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether no readings have been recorded.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// The last `n` readings, oldest first.
    pub fn tail(&self, n: usize) -> &[Reading] {
        let start = self.readings.len().saturating_sub(n);
        &self.readings[start..]
    }
}
