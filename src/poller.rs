//! Fixed-interval characteristic polling.
//!
//! Once a session is polling, every tick reads each configured
//! characteristic, decodes it and hands the result to the session. Reads for
//! different characteristics run concurrently; the next tick does not start
//! until every read of the current tick has finished, so at most one read
//! per characteristic is ever in flight.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::ble::connection::SessionShared;
use crate::ble::transport::{BleTransport, ConnectionHandle};
use crate::data::characteristic::CharacteristicSpec;
use crate::data::reading::Reading;
use crate::error::{Error, Result};
use crate::protocol::decoder::decode_reading;

/// Default interval between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Handle to a running poller.
pub(crate) struct PollerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling and wait for the task to exit.
    ///
    /// Reads still in flight are dropped.
    pub(crate) async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.handle).await;
    }

    /// Cancel the task without waiting.
    pub(crate) fn abort(self) {
        self.handle.abort();
    }
}

/// Polls a fixed set of characteristics on one connection.
pub(crate) struct Poller {
    session: u64,
    transport: Arc<dyn BleTransport>,
    connection: ConnectionHandle,
    characteristics: Vec<CharacteristicSpec>,
    interval: Duration,
    shared: Arc<SessionShared>,
}

impl Poller {
    pub(crate) fn new(
        session: u64,
        transport: Arc<dyn BleTransport>,
        connection: ConnectionHandle,
        characteristics: Vec<CharacteristicSpec>,
        interval: Duration,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            session,
            transport,
            connection,
            characteristics,
            interval,
            shared,
        }
    }

    /// Start polling on a background task.
    pub(crate) fn spawn(self) -> PollerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(stop_rx));

        PollerHandle {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;

        debug!(
            "Poller started for session {} every {:?}",
            self.session, self.interval
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            if !self.shared.is_polling(self.session) {
                break;
            }

            tick += 1;
            trace!("Poll tick {}", tick);

            let reads = self.characteristics.iter().map(|spec| self.read(spec));
            let results = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                results = join_all(reads) => results,
            };

            for (spec, result) in self.characteristics.iter().zip(results) {
                match result {
                    Ok(reading) => {
                        self.shared.publish_reading(self.session, spec.metric, reading);
                    }
                    Err(e) => {
                        self.shared.publish_failure(self.session, spec.metric, &e);
                    }
                }
            }
        }

        debug!("Poller for session {} stopped after {} tick(s)", self.session, tick);
    }

    /// Read and decode one characteristic.
    async fn read(&self, spec: &CharacteristicSpec) -> Result<Reading> {
        let payload = self
            .transport
            .read_characteristic(&self.connection, spec.service, spec.characteristic)
            .await
            .map_err(|e| match e {
                Error::Read { .. } => e,
                other => Error::Read {
                    characteristic: spec.characteristic.to_string(),
                    reason: other.to_string(),
                },
            })?;

        trace!(
            "Read {} bytes from {}: {:02X?}",
            payload.len(),
            spec.characteristic,
            payload
        );

        Ok(decode_reading(&payload, spec, Utc::now())?)
    }
}
