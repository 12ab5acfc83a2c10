//! Broker controller facade.
//!
//! `BrokerController` owns the lifecycle of one management connection and
//! exposes address reconciliation and stats retrieval on top of it:
//!
//! ```text
//! Disconnected → Connecting → Ready → Closing → Closed
//! ```
//!
//! Operations are only accepted in `Ready`. `close()` stops accepting new
//! operations, waits (bounded) for in-flight ones to finish, then releases the
//! connection. Subscribers observe `Ready`, `AddressStatsRetrieved` and
//! `Closed` through [`BrokerController::subscribe`].

use crate::config::{Config, GlobalConfig, SyncConfig};
use crate::management::{BrokerConnector, BrokerEndpoint, ManagementError, SharedManagement};
use crate::model::DesiredAddress;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub mod reconcile;
pub mod settings;
pub mod stats;

pub use reconcile::{
    AddressFailure, ReconciliationEngine, SyncError, SyncOperation, SyncPlan, SyncReport,
};
pub use settings::{parse_size, AddressSettingsResolver, SizeParseError};
pub use stats::{AddressStats, ConnectionStats, ShardStats, StatsCollector, StatsSnapshot};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl ControllerState {
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Ready,
    /// Delivered exactly once per successful stats poll.
    AddressStatsRetrieved(Arc<StatsSnapshot>),
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller is not ready (state {0})")]
    NotReady(ControllerState),
    #[error("controller is closed")]
    Closed,
    #[error("controller already connected (state {0})")]
    AlreadyConnected(ControllerState),
    #[error("broker connection failed: {0}")]
    Connection(#[source] ManagementError),
    #[error(transparent)]
    Management(ManagementError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("invalid global configuration: {0}")]
    Settings(#[from] SizeParseError),
}

/// Knobs of a controller instance.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub sync: SyncConfig,
    pub global: GlobalConfig,
    /// Bound on the in-flight drain during `close()`; zero means do not wait.
    pub close_timeout: Duration,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sync: config.sync.clone(),
            global: config.global.clone(),
            close_timeout: config.lifecycle.close_timeout(),
        }
    }
}

/// Everything bound to one established management connection.
struct Session {
    client: SharedManagement,
    engine: ReconciliationEngine,
    collector: StatsCollector,
}

/// Decrements the in-flight count when an operation finishes, however it finishes.
struct InflightGuard<'a>(&'a watch::Sender<usize>);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct BrokerController {
    connector: Arc<dyn BrokerConnector>,
    options: ControllerOptions,
    resolver: AddressSettingsResolver,
    state: watch::Sender<ControllerState>,
    session: RwLock<Option<Arc<Session>>>,
    inflight: watch::Sender<usize>,
    events: broadcast::Sender<ControllerEvent>,
}

impl BrokerController {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        options: ControllerOptions,
    ) -> Result<Self, ControllerError> {
        let resolver = AddressSettingsResolver::new(&options.global)?;
        let (state, _) = watch::channel(ControllerState::Disconnected);
        let (inflight, _) = watch::channel(0usize);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            connector,
            options,
            resolver,
            state,
            session: RwLock::new(None),
            inflight,
            events,
        })
    }

    pub fn from_config(
        config: &Config,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, ControllerError> {
        Self::new(connector, ControllerOptions::from_config(config))
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Number of broker operations currently running through the facade.
    pub fn in_flight(&self) -> usize {
        *self.inflight.borrow()
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// Open the management connection; emits `Ready` once the handshake succeeds.
    pub async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<(), ControllerError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| match *state {
            ControllerState::Disconnected => {
                *state = ControllerState::Connecting;
                true
            }
            ControllerState::Closing | ControllerState::Closed => {
                rejected = Some(ControllerError::Closed);
                false
            }
            other => {
                rejected = Some(ControllerError::AlreadyConnected(other));
                false
            }
        });
        if let Some(err) = rejected {
            return Err(err);
        }

        tracing::info!(url = %endpoint.url, "connecting to broker management");
        let client = match self.connector.connect(endpoint).await {
            Ok(client) => client,
            Err(err) => {
                let mut closing = false;
                self.state.send_if_modified(|state| {
                    if *state == ControllerState::Connecting {
                        *state = ControllerState::Disconnected;
                        true
                    } else {
                        closing = true;
                        false
                    }
                });
                tracing::warn!(url = %endpoint.url, error = %err, "broker connection failed");
                if closing {
                    self.finish_close(None).await;
                }
                return Err(ControllerError::Connection(err));
            }
        };

        let session = Arc::new(Session {
            engine: ReconciliationEngine::new(
                client.clone(),
                self.resolver.clone(),
                self.options.sync.clone(),
            ),
            collector: StatsCollector::new(
                client.clone(),
                self.options.sync.clone(),
                self.events.clone(),
            ),
            client,
        });
        // the slot is only read once the state says Ready
        *self.session.write() = Some(session);
        let ready = self.state.send_if_modified(|state| {
            if *state == ControllerState::Connecting {
                *state = ControllerState::Ready;
                true
            } else {
                false
            }
        });
        if !ready {
            // close() began while the handshake was in flight
            let session = self.session.write().take();
            self.finish_close(session).await;
            return Err(ControllerError::Closed);
        }
        tracing::info!(url = %endpoint.url, "broker controller ready");
        self.emit(ControllerEvent::Ready);
        Ok(())
    }

    /// Resolve once the controller is ready; fails if it is closing instead.
    pub async fn wait_ready(&self) -> Result<(), ControllerError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ControllerState::Ready => return Ok(()),
                ControllerState::Closing | ControllerState::Closed => {
                    return Err(ControllerError::Closed)
                }
                ControllerState::Disconnected | ControllerState::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(ControllerError::Closed);
            }
        }
    }

    fn begin(&self) -> Result<(Arc<Session>, InflightGuard<'_>), ControllerError> {
        let state = self.state.borrow();
        match *state {
            ControllerState::Ready => {}
            ControllerState::Closing | ControllerState::Closed => {
                return Err(ControllerError::Closed)
            }
            other => return Err(ControllerError::NotReady(other)),
        }
        let session = self
            .session
            .read()
            .clone()
            .ok_or(ControllerError::NotReady(*state))?;
        // counted while the state is still borrowed so close() cannot slip in between
        self.inflight.send_modify(|n| *n += 1);
        drop(state);
        Ok((session, InflightGuard(&self.inflight)))
    }

    /// Reconcile broker addresses with `desired`.
    pub async fn sync(&self, desired: &[DesiredAddress]) -> Result<SyncReport, ControllerError> {
        let (session, _guard) = self.begin()?;
        Ok(session.engine.sync(desired).await?)
    }

    /// Poll broker statistics once; subscribers also receive the snapshot.
    pub async fn retrieve_stats(&self) -> Result<Arc<StatsSnapshot>, ControllerError> {
        let (session, _guard) = self.begin()?;
        session
            .collector
            .retrieve_stats()
            .await
            .map_err(ControllerError::Management)
    }

    /// Poll stats on `interval` until the controller begins closing. A failed
    /// poll is logged and the next tick proceeds.
    pub fn spawn_stats_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut state = self.state.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = state.changed() => {
                        if changed.is_err() || controller.state().is_shutting_down() {
                            break;
                        }
                        continue;
                    }
                }
                match controller.retrieve_stats().await {
                    Ok(_) => {}
                    Err(ControllerError::Closed) => break,
                    Err(ControllerError::NotReady(current)) => {
                        tracing::debug!(state = %current, "skipping stats poll, controller not ready");
                    }
                    Err(err) => tracing::warn!(error = %err, "stats poll failed"),
                }
            }
            tracing::debug!("stats poller stopped");
        })
    }

    /// Stop accepting operations, drain in-flight ones, release the connection.
    pub async fn close(&self) -> Result<(), ControllerError> {
        let mut previous = ControllerState::Closed;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                ControllerState::Closing | ControllerState::Closed => false,
                _ => {
                    *state = ControllerState::Closing;
                    true
                }
            }
        });
        match previous {
            ControllerState::Closed => return Ok(()),
            ControllerState::Closing | ControllerState::Connecting => {
                // another close, or connect(), completes the shutdown
                self.wait_closed().await;
                return Ok(());
            }
            ControllerState::Disconnected | ControllerState::Ready => {}
        }
        tracing::info!(in_flight = self.in_flight(), "closing broker controller");
        self.drain().await;
        let session = self.session.write().take();
        self.finish_close(session).await;
        Ok(())
    }

    async fn drain(&self) {
        let mut rx = self.inflight.subscribe();
        let drained = async {
            loop {
                let pending = *rx.borrow_and_update();
                if pending == 0 || rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(self.options.close_timeout, drained)
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = self.in_flight(),
                timeout_ms = self.options.close_timeout.as_millis() as u64,
                "in-flight broker operations did not drain, closing anyway"
            );
        }
    }

    async fn finish_close(&self, session: Option<Arc<Session>>) {
        if let Some(session) = session {
            if let Err(err) = session.client.close().await {
                tracing::warn!(error = %err, "failed to release broker connection");
            }
        }
        self.state.send_replace(ControllerState::Closed);
        tracing::info!("broker controller closed");
        self.emit(ControllerEvent::Closed);
    }

    async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state == ControllerState::Closed || rx.changed().await.is_err() {
                return;
            }
        }
    }
}
