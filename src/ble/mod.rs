//! BLE communication module.
//!
//! This module provides discovery and connection management for sensor
//! tags, built on a narrow transport interface.

pub mod btleplug_transport;
pub mod connection;
pub mod registry;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use btleplug_transport::BtleplugTransport;
pub use connection::{ConnectionSession, ConnectionState, SessionEvent};
pub use registry::DeviceRegistry;
pub use scanner::{Permission, ScanEvent, ScanSession};
pub use transport::{
    Advertisement, BleTransport, ConnectionHandle, PeripheralHandle, ScanMessage,
};
pub use uuids::*;
