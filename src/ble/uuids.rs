//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants exposed by the sensor tag firmware. The
//! string forms are what the firmware advertises and must match exactly.

use uuid::Uuid;

/// Environmental sensing service UUID (string form).
pub const SENSOR_SERVICE_UUID_STR: &str = "12630000-cc25-497d-9854-9b6c02c77054";
/// Temperature characteristic UUID (string form).
pub const TEMPERATURE_CHARACTERISTIC_UUID_STR: &str = "12630001-cc25-497d-9854-9b6c02c77054";
/// Humidity characteristic UUID (string form).
pub const HUMIDITY_CHARACTERISTIC_UUID_STR: &str = "12630003-cc25-497d-9854-9b6c02c77054";

/// Environmental sensing service UUID.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x1263_0000_cc25_497d_9854_9b6c02c77054);
/// Temperature characteristic UUID (Read).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1263_0001_cc25_497d_9854_9b6c02c77054);
/// Humidity characteristic UUID (Read).
pub const HUMIDITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1263_0003_cc25_497d_9854_9b6c02c77054);

/// Check if a service UUID is the sensor tag service.
pub fn is_sensor_service(uuid: &Uuid) -> bool {
    *uuid == SENSOR_SERVICE_UUID
}
