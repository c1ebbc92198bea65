//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use sensortag_ble::{
    Advertisement, BleTransport, ConnectionHandle, Error, PeripheralHandle, Result, ScanMessage,
};

/// Encode a value in hundredths as a sensor frame.
pub fn frame(centi: u16) -> Vec<u8> {
    let [lo, hi] = centi.to_le_bytes();
    vec![0x00, lo, hi]
}

/// A single characteristic read issued against the fake.
#[derive(Debug, Clone)]
pub struct ReadCall {
    pub peripheral_id: String,
    pub characteristic: Uuid,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    scan_tx: Option<mpsc::UnboundedSender<ScanMessage>>,
    scan_starts: usize,
    scan_stops: usize,
    connect_failures: HashMap<String, String>,
    discovery_failures: HashMap<String, String>,
    payloads: HashMap<(String, Uuid), VecDeque<Vec<u8>>>,
    fixed_payloads: HashMap<(String, Uuid), Vec<u8>>,
    held: HashSet<String>,
    held_discovery: HashSet<String>,
    discoveries: usize,
    links: HashMap<String, mpsc::UnboundedSender<()>>,
    reads: Vec<ReadCall>,
    disconnects: Vec<String>,
}

/// In-memory [`BleTransport`] driven by the test.
pub struct FakeTransport {
    script: Mutex<Script>,
    gate: watch::Sender<u64>,
    next_connection: AtomicU64,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(0);
        Self {
            script: Mutex::new(Script::default()),
            gate,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Deliver an advertisement to the running scan, if any.
    pub fn advertise(&self, id: &str, name: Option<&str>) {
        if let Some(tx) = &self.script.lock().scan_tx {
            let _ = tx.send(ScanMessage::Advertisement(Advertisement::new(id, name)));
        }
    }

    /// Report a transport-level scan failure.
    pub fn fail_scan(&self, reason: &str) {
        if let Some(tx) = &self.script.lock().scan_tx {
            let _ = tx.send(ScanMessage::Error {
                reason: reason.to_string(),
            });
        }
    }

    pub fn fail_connect(&self, id: &str, reason: &str) {
        self.script
            .lock()
            .connect_failures
            .insert(id.to_string(), reason.to_string());
    }

    pub fn clear_connect_failure(&self, id: &str) {
        self.script.lock().connect_failures.remove(id);
    }

    pub fn fail_discovery(&self, id: &str, reason: &str) {
        self.script
            .lock()
            .discovery_failures
            .insert(id.to_string(), reason.to_string());
    }

    /// Queue payloads returned by successive reads. Reads fail once the queue is empty.
    pub fn queue_payloads(&self, id: &str, characteristic: Uuid, payloads: Vec<Vec<u8>>) {
        self.script
            .lock()
            .payloads
            .entry((id.to_string(), characteristic))
            .or_default()
            .extend(payloads);
    }

    /// Return the same payload for every read.
    pub fn set_payload(&self, id: &str, characteristic: Uuid, payload: Vec<u8>) {
        self.script
            .lock()
            .fixed_payloads
            .insert((id.to_string(), characteristic), payload);
    }

    /// Make reads against `id` block until [`FakeTransport::release_reads`].
    pub fn hold_reads(&self, id: &str) {
        self.script.lock().held.insert(id.to_string());
    }

    pub fn release_reads(&self, id: &str) {
        self.script.lock().held.remove(id);
        self.gate.send_modify(|generation| *generation += 1);
    }

    /// Make service discovery on `id` block until [`FakeTransport::release_discovery`].
    pub fn hold_discovery(&self, id: &str) {
        self.script.lock().held_discovery.insert(id.to_string());
    }

    pub fn release_discovery(&self, id: &str) {
        self.script.lock().held_discovery.remove(id);
        self.gate.send_modify(|generation| *generation += 1);
    }

    /// Number of service discoveries started.
    pub fn discoveries(&self) -> usize {
        self.script.lock().discoveries
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self, id: &str) {
        if let Some(tx) = self.script.lock().links.get(id) {
            let _ = tx.send(());
        }
    }

    pub fn reads(&self) -> Vec<ReadCall> {
        self.script.lock().reads.clone()
    }

    pub fn read_count(&self) -> usize {
        self.script.lock().reads.len()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.script.lock().disconnects.clone()
    }

    pub fn scan_starts(&self) -> usize {
        self.script.lock().scan_starts
    }

    pub fn scan_stops(&self) -> usize {
        self.script.lock().scan_stops
    }

    async fn wait_until_released(&self, is_held: impl Fn(&Script) -> bool) {
        let mut gate = self.gate.subscribe();
        loop {
            let held = is_held(&*self.script.lock());
            if !held || gate.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut script = self.script.lock();
        script.scan_tx = Some(tx);
        script.scan_starts += 1;
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut script = self.script.lock();
        script.scan_tx = None;
        script.scan_stops += 1;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<ConnectionHandle> {
        if let Some(reason) = self.script.lock().connect_failures.get(&peripheral.id) {
            return Err(Error::Connect {
                reason: reason.clone(),
            });
        }

        Ok(ConnectionHandle {
            peripheral_id: peripheral.id.clone(),
            connection_id: self.next_connection.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn discover_services(&self, connection: &ConnectionHandle) -> Result<()> {
        self.script.lock().discoveries += 1;

        let id = connection.peripheral_id.clone();
        self.wait_until_released(|script| script.held_discovery.contains(&id))
            .await;

        match self
            .script
            .lock()
            .discovery_failures
            .get(&connection.peripheral_id)
        {
            Some(reason) => Err(Error::Discovery {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn read_characteristic(
        &self,
        connection: &ConnectionHandle,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.script.lock().reads.push(ReadCall {
            peripheral_id: connection.peripheral_id.clone(),
            characteristic,
            at: Instant::now(),
        });

        let id = connection.peripheral_id.clone();
        self.wait_until_released(|script| script.held.contains(&id))
            .await;

        let key = (connection.peripheral_id.clone(), characteristic);
        let mut script = self.script.lock();
        if let Some(payload) = script.payloads.get_mut(&key).and_then(|q| q.pop_front()) {
            return Ok(payload);
        }
        script
            .fixed_payloads
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Read {
                characteristic: characteristic.to_string(),
                reason: "no scripted payload".to_string(),
            })
    }

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<()> {
        let mut script = self.script.lock();
        script.links.remove(&connection.peripheral_id);
        script.disconnects.push(connection.peripheral_id.clone());
        Ok(())
    }

    async fn disconnect_events(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<mpsc::UnboundedReceiver<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .links
            .insert(connection.peripheral_id.clone(), tx);
        Ok(rx)
    }
}
