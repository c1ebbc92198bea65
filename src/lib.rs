// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # sensortag-ble
//!
//! BLE session and telemetry engine for temperature/humidity sensor tags.
//!
//! The crate discovers nearby peripherals, connects to one of them, and
//! polls its temperature and humidity characteristics on a fixed cadence,
//! decoding each payload into a physical reading and keeping a per-session
//! history.
//!
//! ## Features
//!
//! - **Discovery**: Time-bounded scans collecting named peripherals in
//!   first-seen order
//! - **Connection state machine**: `Idle → Connecting → Discovering → Ready
//!   → Polling → Disconnected`, with `Failed` for connect/discovery errors
//! - **Polling**: Fixed-interval reads of every configured characteristic,
//!   with per-tick, per-metric error reporting
//! - **Threshold alerts**: An alert for every temperature reading above a
//!   user-set threshold
//! - **Pluggable transport**: btleplug in production, anything implementing
//!   [`BleTransport`] in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensortag_ble::{ClientConfig, Permission, Result, SensorClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = SensorClient::with_btleplug(ClientConfig::default()).await?;
//!
//!     client.start_scan(Permission::Granted).await?;
//!     let devices = client.wait_for_scan().await?;
//!
//!     if let Some(device) = devices.first() {
//!         client.connect(device).await?;
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!         if let Some(temperature) = client.current_temperature() {
//!             println!("Temperature: {}", temperature);
//!         }
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod utils;

// Re-exports for convenience
pub use client::SensorClient;
pub use config::ClientConfig;
pub use error::{DecodeError, Error, Result};
pub use utils::celsius_to_fahrenheit;

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionState, SessionEvent};
pub use ble::scanner::{Permission, ScanEvent};
pub use ble::transport::{
    Advertisement, BleTransport, ConnectionHandle, PeripheralHandle, ScanMessage,
};
pub use data::{
    CharacteristicSpec, Metric, PayloadEncoding, Reading, ReadingHistory, TemperatureAlert, Unit,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SensorClient>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Reading>();
        let _ = std::any::TypeId::of::<ReadingHistory>();
        let _ = std::any::TypeId::of::<ConnectionState>();
        let _ = std::any::TypeId::of::<PeripheralHandle>();
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
    }
}
