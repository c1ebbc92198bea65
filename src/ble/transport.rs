//! Transport capability interface.
//!
//! The session engine never talks to a Bluetooth stack directly. Everything
//! it needs from the radio goes through [`BleTransport`], which keeps the
//! state machines testable and lets the btleplug binding live in its own
//! module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// A physical device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    /// Stable platform identifier (address or UUID).
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
}

impl PeripheralHandle {
    /// Create a new handle.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl std::fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// An established link to a peripheral, as issued by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    /// Identifier of the connected peripheral.
    pub peripheral_id: String,
    /// Transport-assigned connection number.
    pub connection_id: u64,
}

/// A single advertisement packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform identifier of the advertiser.
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create a new advertisement.
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi: None,
        }
    }
}

/// Message delivered by the transport while a scan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMessage {
    /// A peripheral advertised.
    Advertisement(Advertisement),
    /// The scan failed and will deliver nothing further.
    Error {
        /// Description of the failure.
        reason: String,
    },
}

/// Narrow capability interface over a BLE central stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Begin scanning. Advertisements and scan errors arrive on the returned channel.
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanMessage>>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peripheral.
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<ConnectionHandle>;

    /// Enumerate services and characteristics on a connection.
    async fn discover_services(&self, connection: &ConnectionHandle) -> Result<()>;

    /// Read the current value of a characteristic.
    async fn read_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>>;

    /// Tear the connection down.
    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<()>;

    /// Subscribe to unsolicited disconnects of a connection.
    ///
    /// The channel yields once when the link drops.
    async fn disconnect_events(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<mpsc::UnboundedReceiver<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_display() {
        let named = PeripheralHandle::new("AA:BB", Some("Tag".to_string()));
        assert_eq!(named.to_string(), "Tag (AA:BB)");
        assert_eq!(named.display_name(), "Tag");

        let unnamed = PeripheralHandle::new("AA:BB", None);
        assert_eq!(unnamed.to_string(), "AA:BB");
        assert_eq!(unnamed.display_name(), "AA:BB");
    }
}
