//! Static descriptions of the characteristics the poller reads.

use uuid::Uuid;

use super::reading::{Metric, Unit};
use crate::ble::uuids::{
    HUMIDITY_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID, TEMPERATURE_CHARACTERISTIC_UUID,
};

/// Wire layout of a characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PayloadEncoding {
    /// Status byte followed by a 16-bit value in hundredths (`[status, lo, hi]`).
    #[default]
    StatusPrefixedCentiU16,
}

/// What to read and how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicSpec {
    /// Metric this characteristic carries.
    pub metric: Metric,
    /// Owning GATT service.
    pub service: Uuid,
    /// Characteristic to read.
    pub characteristic: Uuid,
    /// Payload decoder.
    pub encoding: PayloadEncoding,
    /// Unit of decoded values.
    pub unit: Unit,
}

impl CharacteristicSpec {
    /// The sensor tag's temperature characteristic.
    pub fn temperature() -> Self {
        Self {
            metric: Metric::Temperature,
            service: SENSOR_SERVICE_UUID,
            characteristic: TEMPERATURE_CHARACTERISTIC_UUID,
            encoding: PayloadEncoding::StatusPrefixedCentiU16,
            unit: Unit::Celsius,
        }
    }

    /// The sensor tag's humidity characteristic.
    pub fn humidity() -> Self {
        Self {
            metric: Metric::Humidity,
            service: SENSOR_SERVICE_UUID,
            characteristic: HUMIDITY_CHARACTERISTIC_UUID,
            encoding: PayloadEncoding::StatusPrefixedCentiU16,
            unit: Unit::RelativeHumidity,
        }
    }

    /// Both characteristics exposed by the sensor tag.
    pub fn defaults() -> Vec<Self> {
        vec![Self::temperature(), Self::humidity()]
    }
}
