//! [`BleTransport`] implementation backed by btleplug.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::transport::{
    Advertisement, BleTransport, ConnectionHandle, PeripheralHandle, ScanMessage,
};
use super::uuids::is_sensor_service;
use crate::error::{Error, Result};

/// Transport using the platform Bluetooth stack through btleplug.
pub struct BtleplugTransport {
    /// The BLE adapter.
    adapter: Adapter,
    /// Task forwarding adapter events while scanning.
    scan_handle: Mutex<Option<JoinHandle<()>>>,
    /// Open connections by connection id.
    connections: RwLock<HashMap<u64, Peripheral>>,
    /// Connection id counter.
    next_connection_id: AtomicU64,
}

impl BtleplugTransport {
    /// Create a transport on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_handle: Mutex::new(None),
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn peripheral_for(&self, connection: &ConnectionHandle) -> Result<Peripheral> {
        self.connections
            .read()
            .get(&connection.connection_id)
            .cloned()
            .ok_or(Error::NotConnected)
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;

        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    /// Turn a discovery event into an advertisement message.
    async fn advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        Some(Advertisement {
            id: id.to_string(),
            name: properties.local_name,
            rssi: properties.rssi,
        })
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanMessage>> {
        let mut events = self.adapter.events().await.map_err(|e| Error::Scan {
            reason: e.to_string(),
        })?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::Scan {
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id))
                        | Some(CentralEvent::DeviceUpdated(id)) => {
                            if let Some(advertisement) =
                                BtleplugTransport::advertisement(&adapter, &id).await
                            {
                                if tx.send(ScanMessage::Advertisement(advertisement)).is_err() {
                                    break;
                                }
                            }
                        }
                        Some(_) => {}
                        None => {
                            let _ = tx.send(ScanMessage::Error {
                                reason: "adapter event stream ended".to_string(),
                            });
                            break;
                        }
                    }
                }
            }

            debug!("Scan event forwarder ended");
        });

        if let Some(previous) = self.scan_handle.lock().replace(handle) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(handle) = self.scan_handle.lock().take() {
            handle.abort();
        }

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<ConnectionHandle> {
        let device = self
            .find_peripheral(&peripheral.id)
            .await
            .map_err(|e| Error::Connect {
                reason: e.to_string(),
            })?;

        if !device.is_connected().await.unwrap_or(false) {
            device.connect().await.map_err(|e| Error::Connect {
                reason: e.to_string(),
            })?;
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        self.connections.write().insert(connection_id, device);

        debug!("Opened connection {} to {}", connection_id, peripheral.id);

        Ok(ConnectionHandle {
            peripheral_id: peripheral.id.clone(),
            connection_id,
        })
    }

    async fn discover_services(&self, connection: &ConnectionHandle) -> Result<()> {
        let device = self.peripheral_for(connection)?;

        device.discover_services().await.map_err(|e| Error::Discovery {
            reason: e.to_string(),
        })?;

        let services = device.services();
        for service in &services {
            for characteristic in &service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
            }
        }

        if !services.iter().any(|s| is_sensor_service(&s.uuid)) {
            warn!(
                "Peripheral {} does not expose the sensor service",
                connection.peripheral_id
            );
        }

        Ok(())
    }

    async fn read_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let device = self.peripheral_for(connection)?;

        let target = device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| Error::Read {
                characteristic: characteristic.to_string(),
                reason: "characteristic not found".to_string(),
            })?;

        device.read(&target).await.map_err(|e| Error::Read {
            characteristic: characteristic.to_string(),
            reason: e.to_string(),
        })
    }

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<()> {
        let device = self
            .connections
            .write()
            .remove(&connection.connection_id)
            .ok_or(Error::NotConnected)?;

        device.disconnect().await.map_err(Error::Bluetooth)?;
        debug!("Closed connection {}", connection.connection_id);

        Ok(())
    }

    async fn disconnect_events(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<mpsc::UnboundedReceiver<()>> {
        let device_id = self.peripheral_for(connection)?.id();
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == device_id => {
                            let _ = tx.send(());
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        });

        Ok(rx)
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.scan_handle.lock().take() {
            handle.abort();
        }
    }
}
