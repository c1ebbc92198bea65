//! Connection session state machine.
//!
//! Drives a single peripheral from selection through connect, service
//! discovery and polling to disconnect:
//!
//! ```text
//! Idle -> Connecting -> Discovering -> Ready -> Polling -> Disconnected
//!            |              |
//!            +--> Failed <--+
//! ```
//!
//! Any state may drop to `Disconnected` when the link is lost. `Failed` and
//! `Disconnected` return to `Idle` when a new connection is requested.
//!
//! Each `connect()` call opens a new session identity. Background work
//! (the poller and the disconnect watcher) carries the identity it was
//! started with and is ignored once a newer session exists.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{BleTransport, ConnectionHandle, PeripheralHandle};
use crate::config::ClientConfig;
use crate::data::alerts::{TemperatureAlert, ThresholdMonitor};
use crate::data::reading::{Metric, Reading, ReadingHistory};
use crate::error::{Error, Result};
use crate::poller::{Poller, PollerHandle};

/// Lifecycle state of the connection session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No connection requested.
    #[default]
    Idle,
    /// Waiting for the transport to connect.
    Connecting,
    /// Enumerating services and characteristics.
    Discovering,
    /// Connected with characteristics known.
    Ready,
    /// The poller is running.
    Polling,
    /// The link was torn down or lost.
    Disconnected,
    /// Connecting or discovery failed.
    Failed(String),
}

impl ConnectionState {
    /// Check if a link is being established or in use.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Discovering | Self::Ready | Self::Polling
        )
    }

    /// Check if the session has ended and needs a fresh `connect()`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }

    /// Whether `next` is reachable from this state in one step.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Discovering) | (Connecting, Failed(_)) => true,
            (Discovering, Ready) | (Discovering, Failed(_)) => true,
            (Ready, Polling) => true,
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            (Disconnected, Idle) | (Failed(_), Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Polling => write!(f, "Polling"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Event emitted by the connection session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A reading was decoded and appended to its history.
    Reading {
        /// Metric the reading belongs to.
        metric: Metric,
        /// The decoded reading.
        reading: Reading,
    },
    /// Reading or decoding one metric failed on one tick.
    ReadFailed {
        /// Metric whose read failed.
        metric: Metric,
        /// Description of the failure.
        error: String,
    },
    /// A temperature reading crossed the alert threshold.
    Alert(TemperatureAlert),
}

/// State shared between the session, its poller and its disconnect watcher.
pub(crate) struct SessionShared {
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Identity of the current session.
    current: AtomicU64,
    /// Per-metric history for the current session.
    histories: RwLock<HashMap<Metric, ReadingHistory>>,
    /// Alert threshold evaluation.
    monitor: RwLock<ThresholdMonitor>,
    /// Link currently held.
    connection: Mutex<Option<ConnectionHandle>>,
    /// Running poller.
    poller: Mutex<Option<PollerHandle>>,
    /// Disconnect watcher task.
    watcher: Mutex<Option<JoinHandle<()>>>,
    /// Channel for session events.
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    fn new(config: &ClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            state: RwLock::new(ConnectionState::Idle),
            current: AtomicU64::new(0),
            histories: RwLock::new(HashMap::new()),
            monitor: RwLock::new(ThresholdMonitor::new(config.alert_threshold)),
            connection: Mutex::new(None),
            poller: Mutex::new(None),
            watcher: Mutex::new(None),
            event_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub(crate) fn is_current(&self, session: u64) -> bool {
        self.current.load(Ordering::SeqCst) == session
    }

    /// Whether the poller of `session` may issue reads.
    pub(crate) fn is_polling(&self, session: u64) -> bool {
        self.is_current(session) && *self.state.read() == ConnectionState::Polling
    }

    /// Open a new session identity with empty histories.
    fn begin_session(&self, metrics: &[Metric]) -> u64 {
        let mut histories = self.histories.write();
        let session = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        histories.clear();
        for metric in metrics {
            histories.insert(*metric, ReadingHistory::new(*metric));
        }
        session
    }

    /// Apply a state change if the graph allows it.
    fn transition(&self, next: ConnectionState) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            if !state.can_transition_to(&next) {
                return Err(Error::InvalidTransition {
                    from: state.to_string(),
                    to: next.to_string(),
                });
            }
            std::mem::replace(&mut *state, next.clone())
        };

        debug!("Connection state changed: {} -> {}", previous, next);

        let _ = self.event_tx.send(SessionEvent::StateChanged {
            from: previous,
            to: next,
        });

        Ok(())
    }

    /// Record a decoded reading for `session`.
    ///
    /// Returns `false` without touching any state if the session is no
    /// longer current or has left `Polling`.
    pub(crate) fn publish_reading(&self, session: u64, metric: Metric, reading: Reading) -> bool {
        {
            let mut histories = self.histories.write();
            if !self.is_polling(session) {
                debug!("Discarding stale {} reading from session {}", metric, session);
                return false;
            }
            histories
                .entry(metric)
                .or_insert_with(|| ReadingHistory::new(metric))
                .push(reading.clone());
        }

        debug!("{} = {}", metric, reading);

        let alert = match metric {
            Metric::Temperature => self.monitor.read().evaluate(&reading),
            Metric::Humidity => None,
        };

        let _ = self.event_tx.send(SessionEvent::Reading { metric, reading });

        if let Some(alert) = alert {
            warn!("Alert: {}", alert);
            let _ = self.event_tx.send(SessionEvent::Alert(alert));
        }

        true
    }

    /// Report a failed read or decode for `session`.
    pub(crate) fn publish_failure(&self, session: u64, metric: Metric, error: &Error) -> bool {
        if !self.is_polling(session) {
            return false;
        }

        warn!("Polling {} failed: {}", metric, error);

        let _ = self.event_tx.send(SessionEvent::ReadFailed {
            metric,
            error: error.to_string(),
        });

        true
    }

    /// Stop background work owned by the current session.
    async fn stop_background(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }

        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
    }

    /// Take the held link if it is still `connection`.
    fn release_slot(&self, connection: &ConnectionHandle) -> Option<ConnectionHandle> {
        let mut slot = self.connection.lock();
        if slot.as_ref() == Some(connection) {
            slot.take()
        } else {
            None
        }
    }

    /// Handle an unsolicited link loss reported for `session`.
    ///
    /// The transport side of the link is released here, since nothing else
    /// will disconnect it once the session has left the active states.
    async fn on_link_lost(&self, session: u64, transport: &dyn BleTransport) {
        if !self.is_current(session) {
            debug!("Ignoring disconnect from superseded session {}", session);
            return;
        }

        info!("Peripheral disconnected");

        if let Err(e) = self.transition(ConnectionState::Disconnected) {
            debug!("Link loss after session ended: {}", e);
        }

        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.stop().await;
        }

        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            if let Err(e) = transport.disconnect(&connection).await {
                debug!("Releasing lost link failed: {}", e);
            }
        }
    }
}

/// Manages the single connection to a sensor tag.
pub struct ConnectionSession {
    /// Transport used for the link.
    transport: Arc<dyn BleTransport>,
    /// Polling and alert configuration.
    config: ClientConfig,
    /// State shared with background tasks.
    shared: Arc<SessionShared>,
}

impl ConnectionSession {
    /// Create a new idle connection session.
    pub fn new(transport: Arc<dyn BleTransport>, config: ClientConfig) -> Self {
        let shared = Arc::new(SessionShared::new(&config));

        Self {
            transport,
            config,
            shared,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The peripheral currently connected, if any.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.shared.connection.lock().clone()
    }

    /// Most recent reading of a metric in this session.
    pub fn latest(&self, metric: Metric) -> Option<Reading> {
        self.shared
            .histories
            .read()
            .get(&metric)
            .and_then(|h| h.latest().cloned())
    }

    /// Snapshot of a metric's history in this session.
    pub fn history(&self, metric: Metric) -> ReadingHistory {
        self.shared
            .histories
            .read()
            .get(&metric)
            .cloned()
            .unwrap_or_else(|| ReadingHistory::new(metric))
    }

    /// Current alert threshold.
    pub fn alert_threshold(&self) -> Option<f64> {
        self.shared.monitor.read().threshold()
    }

    /// Set or clear the temperature alert threshold.
    pub fn set_alert_threshold(&self, threshold: Option<f64>) -> Result<()> {
        if let Some(value) = threshold {
            if !value.is_finite() {
                return Err(Error::InvalidParameter {
                    name: "alert_threshold".to_string(),
                    value: value.to_string(),
                });
            }
        }

        self.shared.monitor.write().set_threshold(threshold);
        Ok(())
    }

    /// Connect to a peripheral, discover its services and start polling.
    ///
    /// Any existing connection is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] or [`Error::Discovery`] and leaves the
    /// session in `Failed` if the link could not be brought up.
    pub async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.teardown().await;

        let state = self.shared.state();
        if state.is_terminal() {
            self.shared.transition(ConnectionState::Idle)?;
        }

        let metrics: Vec<Metric> = self.config.characteristics.iter().map(|c| c.metric).collect();
        let session = self.shared.begin_session(&metrics);

        info!("Connecting to {} (session {})", peripheral, session);
        self.shared.transition(ConnectionState::Connecting)?;

        let connection = match self.transport.connect(peripheral).await {
            Ok(connection) => connection,
            Err(e) => {
                let reason = match e {
                    Error::Connect { reason } => reason,
                    other => other.to_string(),
                };
                error!("Failed to connect to {}: {}", peripheral, reason);
                if self.shared.is_current(session) {
                    let _ = self.shared.transition(ConnectionState::Failed(reason.clone()));
                }
                return Err(Error::Connect { reason });
            }
        };

        if !self.shared.is_current(session) {
            self.release(&connection).await;
            return Err(superseded());
        }
        *self.shared.connection.lock() = Some(connection.clone());

        if let Err(e) = self.bring_up(session, &connection).await {
            if self.shared.is_current(session) {
                self.shared.stop_background().await;
            }
            // Whoever takes the link out of the slot releases it. A newer
            // session's teardown or the link watcher may already have.
            if let Some(held) = self.shared.release_slot(&connection) {
                self.release(&held).await;
            }
            return Err(e);
        }

        Ok(())
    }

    async fn release(&self, connection: &ConnectionHandle) {
        if let Err(e) = self.transport.disconnect(connection).await {
            debug!("Cleanup disconnect failed: {}", e);
        }
    }

    /// Discovery and poller start for an established link.
    async fn bring_up(&self, session: u64, connection: &ConnectionHandle) -> Result<()> {
        self.shared.transition(ConnectionState::Discovering)?;
        self.spawn_disconnect_watcher(session, connection).await;

        if let Err(e) = self.transport.discover_services(connection).await {
            let reason = match e {
                Error::Discovery { reason } => reason,
                other => other.to_string(),
            };
            error!("Service discovery failed: {}", reason);
            if self.shared.is_current(session) {
                let _ = self.shared.transition(ConnectionState::Failed(reason.clone()));
            }
            return Err(Error::Discovery { reason });
        }

        if !self.shared.is_current(session) {
            return Err(superseded());
        }

        if self.shared.state() != ConnectionState::Discovering {
            warn!("Link to {} lost during service discovery", connection.peripheral_id);
            return Err(Error::Connect {
                reason: "link lost during service discovery".to_string(),
            });
        }

        self.shared.transition(ConnectionState::Ready)?;
        info!("Connected to {}", connection.peripheral_id);

        self.shared.transition(ConnectionState::Polling)?;

        let poller = Poller::new(
            session,
            self.transport.clone(),
            connection.clone(),
            self.config.characteristics.clone(),
            self.config.poll_interval,
            self.shared.clone(),
        );
        *self.shared.poller.lock() = Some(poller.spawn());

        Ok(())
    }

    /// Start forwarding transport disconnect notifications into the session.
    async fn spawn_disconnect_watcher(&self, session: u64, connection: &ConnectionHandle) {
        let mut events = match self.transport.disconnect_events(connection).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Disconnect notifications unavailable: {}", e);
                return;
            }
        };

        let shared = self.shared.clone();
        let transport = self.transport.clone();
        let handle = tokio::spawn(async move {
            if events.recv().await.is_some() {
                shared.on_link_lost(session, transport.as_ref()).await;
            }
        });

        if let Some(previous) = self.shared.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Disconnect from the peripheral.
    ///
    /// Disconnecting a session that holds no link is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.shared.state().is_active() {
            return Ok(());
        }

        info!("Disconnecting");
        self.shared.transition(ConnectionState::Disconnected)?;
        self.shared.stop_background().await;

        let connection = self.shared.connection.lock().take();
        if let Some(connection) = connection {
            self.transport.disconnect(&connection).await?;
        }

        Ok(())
    }

    /// Best-effort disconnect used before a new connection.
    async fn teardown(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Error tearing down previous connection: {}", e);
        }
    }
}

fn superseded() -> Error {
    Error::Connect {
        reason: "superseded by a newer connection".to_string(),
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.shared.watcher.lock().take() {
            watcher.abort();
        }
        if let Some(poller) = self.shared.poller.lock().take() {
            poller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockBleTransport;
    use tokio::sync::mpsc;

    fn peripheral() -> PeripheralHandle {
        PeripheralHandle::new("AA:BB:CC", Some("Sensor".to_string()))
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle {
            peripheral_id: "AA:BB:CC".to_string(),
            connection_id: 1,
        }
    }

    #[test]
    fn test_transition_graph() {
        use ConnectionState::*;

        assert!(Idle.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Discovering));
        assert!(Discovering.can_transition_to(&Ready));
        assert!(Ready.can_transition_to(&Polling));
        assert!(Polling.can_transition_to(&Disconnected));

        assert!(!Idle.can_transition_to(&Ready));
        assert!(!Connecting.can_transition_to(&Ready));
        assert!(!Connecting.can_transition_to(&Polling));
        assert!(!Polling.can_transition_to(&Ready));
        assert!(!Failed("x".into()).can_transition_to(&Connecting));

        for state in [Connecting, Discovering, Ready, Polling, Failed("x".into())] {
            assert!(state.can_transition_to(&Disconnected), "{}", state);
        }
        assert!(!Disconnected.can_transition_to(&Disconnected));

        assert!(Disconnected.can_transition_to(&Idle));
        assert!(Failed("x".into()).can_transition_to(&Idle));
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Polling.is_active());
        assert!(!ConnectionState::Idle.is_active());
        assert!(ConnectionState::Failed("x".into()).is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Ready.is_terminal());
        assert_eq!(
            ConnectionState::Failed("timeout".into()).to_string(),
            "Failed: timeout"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_terminal() {
        let mut mock = MockBleTransport::new();
        mock.expect_connect().times(1).returning(|_| {
            Err(Error::Connect {
                reason: "out of range".to_string(),
            })
        });
        mock.expect_discover_services().never();

        let session = ConnectionSession::new(Arc::new(mock), ClientConfig::default());
        let result = session.connect(&peripheral()).await;

        assert!(matches!(result, Err(Error::Connect { .. })));
        assert_eq!(
            session.state(),
            ConnectionState::Failed("out of range".to_string())
        );
        assert!(session.connection().is_none());
    }

    #[tokio::test]
    async fn test_discovery_failure_is_terminal_and_releases_link() {
        let mut mock = MockBleTransport::new();
        mock.expect_connect().returning(|_| Ok(connection()));
        mock.expect_disconnect_events().returning(|_| {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        });
        mock.expect_discover_services().returning(|_| {
            Err(Error::Discovery {
                reason: "gatt error".to_string(),
            })
        });
        mock.expect_disconnect().times(1).returning(|_| Ok(()));
        mock.expect_read_characteristic().never();

        let session = ConnectionSession::new(Arc::new(mock), ClientConfig::default());
        let mut events = session.subscribe();
        let result = session.connect(&peripheral()).await;

        assert!(matches!(result, Err(Error::Discovery { .. })));
        assert_eq!(
            session.state(),
            ConnectionState::Failed("gatt error".to_string())
        );

        let mut states = Vec::new();
        while let Ok(SessionEvent::StateChanged { to, .. }) = events.try_recv() {
            states.push(to);
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Discovering,
                ConnectionState::Failed("gatt error".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let mut mock = MockBleTransport::new();
        mock.expect_disconnect().never();
        let session = ConnectionSession::new(Arc::new(mock), ClientConfig::default());
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_link_loss_releases_transport_link() {
        let mut mock = MockBleTransport::new();
        mock.expect_disconnect()
            .withf(|conn| conn.connection_id == 1)
            .times(1)
            .returning(|_| Ok(()));

        let shared = SessionShared::new(&ClientConfig::default());
        let session = shared.begin_session(&Metric::ALL);
        shared.transition(ConnectionState::Connecting).unwrap();
        shared.transition(ConnectionState::Discovering).unwrap();
        shared.transition(ConnectionState::Ready).unwrap();
        shared.transition(ConnectionState::Polling).unwrap();
        *shared.connection.lock() = Some(connection());

        shared.on_link_lost(session, &mock).await;
        assert_eq!(shared.state(), ConnectionState::Disconnected);
        assert!(shared.connection.lock().is_none());

        // A repeated notification finds nothing left to release.
        shared.on_link_lost(session, &mock).await;
    }

    #[test]
    fn test_threshold_validation() {
        let session =
            ConnectionSession::new(Arc::new(MockBleTransport::new()), ClientConfig::default());
        assert!(session.set_alert_threshold(Some(f64::NAN)).is_err());
        session.set_alert_threshold(Some(30.0)).unwrap();
        assert_eq!(session.alert_threshold(), Some(30.0));
        session.set_alert_threshold(None).unwrap();
        assert_eq!(session.alert_threshold(), None);
    }

    #[test]
    fn test_stale_session_reading_rejected() {
        let shared = SessionShared::new(&ClientConfig::default());
        let old = shared.begin_session(&Metric::ALL);
        shared.transition(ConnectionState::Connecting).unwrap();
        shared.transition(ConnectionState::Discovering).unwrap();
        shared.transition(ConnectionState::Ready).unwrap();
        shared.transition(ConnectionState::Polling).unwrap();

        let new = shared.begin_session(&Metric::ALL);
        assert_ne!(old, new);

        let reading = Reading::new(21.0, crate::data::reading::Unit::Celsius, chrono::Utc::now());
        assert!(!shared.publish_reading(old, Metric::Temperature, reading.clone()));
        assert!(shared.histories.read()[&Metric::Temperature].is_empty());

        assert!(shared.publish_reading(new, Metric::Temperature, reading));
        assert_eq!(shared.histories.read()[&Metric::Temperature].len(), 1);
    }
}
