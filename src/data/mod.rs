//! Data structures for sensor telemetry.
//!
//! This module contains the reading, history, characteristic and alert
//! types shared by the poller and the UI-facing client.

pub mod alerts;
pub mod characteristic;
pub mod reading;

pub use alerts::{TemperatureAlert, ThresholdMonitor};
pub use characteristic::{CharacteristicSpec, PayloadEncoding};
pub use reading::{Metric, Reading, ReadingHistory, Unit};
