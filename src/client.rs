//! Sensor client: the single entry point for a UI layer.
//!
//! Owns one [`ScanSession`] and one [`ConnectionSession`] and enforces that
//! the radio is used for either scanning or a connection, never both.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ble::btleplug_transport::BtleplugTransport;
use crate::ble::connection::{ConnectionSession, ConnectionState, SessionEvent};
use crate::ble::scanner::{Permission, ScanEvent, ScanSession};
use crate::ble::transport::{BleTransport, PeripheralHandle};
use crate::config::ClientConfig;
use crate::data::reading::{Metric, Reading, ReadingHistory};
use crate::error::{Error, Result};

/// Discovery, connection and telemetry for one sensor tag at a time.
pub struct SensorClient {
    /// Configuration in effect.
    config: ClientConfig,
    /// Discovery.
    scanner: ScanSession,
    /// Connection and polling.
    session: ConnectionSession,
}

impl SensorClient {
    /// Create a client over the given transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid.
    pub fn new(transport: Arc<dyn BleTransport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            scanner: ScanSession::new(transport.clone(), config.event_capacity),
            session: ConnectionSession::new(transport, config.clone()),
            config,
        })
    }

    /// Create a client on the first Bluetooth adapter of this machine.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: ClientConfig) -> Result<Self> {
        let transport = BtleplugTransport::new().await?;
        Self::new(Arc::new(transport), config)
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // === Discovery ===

    /// Start a scan pass of the configured duration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if permission was refused,
    /// [`Error::SessionBusy`] while a connection is active, or
    /// [`Error::Scan`] if the transport could not start scanning.
    pub async fn start_scan(&self, permission: Permission) -> Result<()> {
        if self.session.state().is_active() {
            return Err(Error::SessionBusy {
                operation: "scan".to_string(),
            });
        }

        self.scanner
            .start(permission, self.config.scan_duration)
            .await
    }

    /// Stop scanning. A no-op when no scan is running.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop().await
    }

    /// Wait for the running scan pass to end.
    pub async fn wait_for_scan(&self) -> Result<Vec<PeripheralHandle>> {
        self.scanner.wait().await
    }

    /// Check if a scan pass is running.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Discovered devices in first-seen order.
    pub fn devices(&self) -> Vec<PeripheralHandle> {
        self.scanner.devices()
    }

    /// Subscribe to scan events.
    pub fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.scanner.subscribe()
    }

    // === Connection ===

    /// Connect to a peripheral and start polling it.
    ///
    /// A running scan is stopped and any existing connection is torn down.
    pub async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        if self.scanner.is_scanning() {
            debug!("Stopping scan before connecting");
            self.scanner.stop().await?;
        }

        self.session.connect(peripheral).await
    }

    /// Connect to a discovered peripheral by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeripheralNotFound`] if the id is not in the registry.
    pub async fn connect_by_id(&self, id: &str) -> Result<()> {
        let peripheral = self
            .scanner
            .device(id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })?;

        self.connect(&peripheral).await
    }

    /// Disconnect from the current peripheral.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Subscribe to connection, reading and alert events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    // === Telemetry ===

    /// Latest temperature reading of the current session.
    pub fn current_temperature(&self) -> Option<Reading> {
        self.session.latest(Metric::Temperature)
    }

    /// Latest humidity reading of the current session.
    pub fn current_humidity(&self) -> Option<Reading> {
        self.session.latest(Metric::Humidity)
    }

    /// Latest reading of a metric.
    pub fn latest(&self, metric: Metric) -> Option<Reading> {
        self.session.latest(metric)
    }

    /// History of a metric in the current session.
    pub fn history(&self, metric: Metric) -> ReadingHistory {
        self.session.history(metric)
    }

    /// Current temperature alert threshold.
    pub fn alert_threshold(&self) -> Option<f64> {
        self.session.alert_threshold()
    }

    /// Set or clear the temperature alert threshold.
    pub fn set_alert_threshold(&self, threshold: Option<f64>) -> Result<()> {
        self.session.set_alert_threshold(threshold)
    }

    /// Stop scanning and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down sensor client");

        self.scanner.stop().await?;
        self.session.disconnect().await
    }
}
