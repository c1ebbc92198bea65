//! Time-bounded BLE scanning.
//!
//! A [`ScanSession`] runs one discovery pass at a time. Each pass clears the
//! [`DeviceRegistry`], feeds it from the transport's advertisement channel,
//! and ends on its own once the configured duration has elapsed.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::registry::DeviceRegistry;
use super::transport::{BleTransport, PeripheralHandle, ScanMessage};
use crate::error::{Error, Result};

/// Default scan window.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Outcome of the OS permission prompt, consumed before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Scanning is allowed.
    Granted,
    /// The user or OS refused.
    Denied,
}

impl From<bool> for Permission {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// Event emitted by a scan session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A scan pass started with an empty registry.
    Started,
    /// A new named peripheral was added to the registry.
    DeviceDiscovered(PeripheralHandle),
    /// The pass ended, by timeout or explicit stop.
    Completed {
        /// Registry contents at the end of the pass.
        devices: Vec<PeripheralHandle>,
    },
    /// The transport reported an error and the pass was aborted.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// How a pass ended; `None` while it is still running.
type ScanOutcome = Option<std::result::Result<(), String>>;

/// Handle to the background task driving one scan pass.
///
/// The handle stays in the session until the next pass replaces it, so the
/// stop signal is reachable while callers wait on `done`.
struct ScanTask {
    stop_tx: Option<oneshot::Sender<()>>,
    done: watch::Receiver<ScanOutcome>,
    handle: JoinHandle<()>,
}

/// Discovery process feeding a [`DeviceRegistry`].
pub struct ScanSession {
    /// Transport to scan with.
    transport: Arc<dyn BleTransport>,
    /// Devices seen during the current (or last) pass.
    registry: Arc<RwLock<DeviceRegistry>>,
    /// Whether a pass is in progress.
    is_scanning: Arc<AtomicBool>,
    /// Identity of the current pass.
    generation: Arc<AtomicU64>,
    /// Channel for scan events.
    event_tx: broadcast::Sender<ScanEvent>,
    /// The running pass, if any.
    task: Mutex<Option<ScanTask>>,
}

impl ScanSession {
    /// Create a new scan session over a transport.
    pub fn new(transport: Arc<dyn BleTransport>, event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));

        Self {
            transport,
            registry: Arc::new(RwLock::new(DeviceRegistry::new())),
            is_scanning: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            event_tx,
            task: Mutex::new(None),
        }
    }

    /// Start a discovery pass lasting `duration`.
    ///
    /// Any pass already running is stopped first, and the registry is
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without touching the radio when
    /// permission was refused, or the transport's error if scanning could
    /// not be started.
    pub async fn start(&self, permission: Permission, duration: Duration) -> Result<()> {
        if permission == Permission::Denied {
            warn!("Bluetooth permission denied, not scanning");
            return Err(Error::PermissionDenied);
        }

        if duration.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_duration".to_string(),
                value: format!("{:?}", duration),
            });
        }

        self.stop().await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry.write().clear();

        let messages = self.transport.start_scan().await.map_err(|e| match e {
            Error::Scan { .. } => e,
            other => Error::Scan {
                reason: other.to_string(),
            },
        })?;

        info!("Starting BLE scan #{} for {:?}", generation, duration);

        self.is_scanning.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(ScanEvent::Started);

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done) = watch::channel(None);
        let run = ScanRun {
            generation,
            deadline: Instant::now() + duration,
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            is_scanning: self.is_scanning.clone(),
            current: self.generation.clone(),
            event_tx: self.event_tx.clone(),
            done_tx,
        };

        let handle = tokio::spawn(run.run(messages, stop_rx));

        *self.task.lock() = Some(ScanTask {
            stop_tx: Some(stop_tx),
            done,
            handle,
        });

        Ok(())
    }

    /// Stop the current pass. Stopping an idle session is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (stop_tx, done) = {
            let mut task = self.task.lock();
            match task.as_mut() {
                Some(task) => (task.stop_tx.take(), task.done.clone()),
                None => {
                    trace!("No scan running, ignoring stop request");
                    return Ok(());
                }
            }
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        match Self::finished(done).await {
            Ok(()) => {}
            Err(Error::Scan { reason }) => debug!("Stopped scan had already failed: {}", reason),
            Err(e) => warn!("{}", e),
        }

        Ok(())
    }

    /// Wait for the current pass to end and return the discovered devices.
    ///
    /// Returns immediately with the registry contents if no pass is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scan`] if the transport aborted the pass.
    pub async fn wait(&self) -> Result<Vec<PeripheralHandle>> {
        let done = self.task.lock().as_ref().map(|task| task.done.clone());

        if let Some(done) = done {
            Self::finished(done).await?;
        }

        Ok(self.devices())
    }

    /// Wait until a pass reports its outcome.
    async fn finished(mut done: watch::Receiver<ScanOutcome>) -> Result<()> {
        let outcome = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal("scan task ended without an outcome".to_string()))?
            .clone();

        match outcome {
            Some(Err(reason)) => Err(Error::Scan { reason }),
            _ => Ok(()),
        }
    }

    /// Check if a pass is in progress.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Devices discovered so far, in first-seen order.
    pub fn devices(&self) -> Vec<PeripheralHandle> {
        self.registry.read().devices().to_vec()
    }

    /// Look a discovered device up by id.
    pub fn device(&self, id: &str) -> Option<PeripheralHandle> {
        self.registry.read().get(id).cloned()
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        let was_scanning = self.is_scanning.swap(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.handle.abort();
        }

        // The aborted task never reaches its own stop_scan call.
        if was_scanning {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    if let Err(e) = transport.stop_scan().await {
                        warn!("Failed to stop transport scan on drop: {}", e);
                    }
                });
            } else {
                warn!("No runtime available, transport scan left running");
            }
        }
    }
}

/// State moved into the scan task.
struct ScanRun {
    generation: u64,
    deadline: Instant,
    transport: Arc<dyn BleTransport>,
    registry: Arc<RwLock<DeviceRegistry>>,
    is_scanning: Arc<AtomicBool>,
    current: Arc<AtomicU64>,
    event_tx: broadcast::Sender<ScanEvent>,
    done_tx: watch::Sender<ScanOutcome>,
}

impl ScanRun {
    async fn run(
        self,
        mut messages: mpsc::UnboundedReceiver<ScanMessage>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    debug!("Scan #{} stopped", self.generation);
                    break Ok(());
                }
                _ = &mut deadline => {
                    debug!("Scan #{} window elapsed", self.generation);
                    break Ok(());
                }
                message = messages.recv() => match message {
                    Some(ScanMessage::Advertisement(advertisement)) => {
                        if self.current.load(Ordering::SeqCst) != self.generation {
                            break Ok(());
                        }
                        let added = self.registry.write().observe(&advertisement);
                        if let Some(handle) = added {
                            info!("Discovered device: {}", handle);
                            let _ = self.event_tx.send(ScanEvent::DeviceDiscovered(handle));
                        }
                    }
                    Some(ScanMessage::Error { reason }) => {
                        warn!("Scan #{} aborted: {}", self.generation, reason);
                        break Err(Error::Scan { reason });
                    }
                    None => {
                        debug!("Scan #{} message channel closed", self.generation);
                        break Ok(());
                    }
                }
            }
        };

        self.is_scanning.store(false, Ordering::SeqCst);

        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop transport scan: {}", e);
        }

        match &outcome {
            Ok(()) => {
                let devices = self.registry.read().devices().to_vec();
                info!(
                    "Scan #{} finished with {} device(s)",
                    self.generation,
                    devices.len()
                );
                let _ = self.event_tx.send(ScanEvent::Completed { devices });
            }
            Err(e) => {
                let _ = self.event_tx.send(ScanEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }

        self.done_tx
            .send_replace(Some(outcome.map_err(|e| match e {
                Error::Scan { reason } => reason,
                other => other.to_string(),
            })));
    }
}
