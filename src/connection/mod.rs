//! Connection lifecycle management
//!
//! [`ConnectionManager`] owns the single logical NetworkTables connection. It
//! establishes links through a [`NetworkClient`], republishes everything the
//! client reports as [`TopicEvent`]s on a broadcast channel, and reconnects
//! with exponential backoff when the link drops unexpectedly.
//!
//! Transitions (`connect`, `disconnect`, loss handling and every reconnect
//! attempt) are serialized through one async mutex. Reads and publishes never
//! take it: they consult the current state and fail fast with
//! [`BridgeError::NotConnected`] while the link is down.

use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientEvent, ClientLink, NetworkClient, TopicSnapshot};
use crate::config::BridgeConfig;
use crate::driver::Driver;
use crate::types::{
    ConnectionInfo, ConnectionState, RemotePeer, ServerAddress, TimeSyncInfo, TimestampedValue,
    TopicInfo, Value,
};
use crate::{BridgeError, Result};

mod reconnect;

/// Parameters accepted by [`ConnectionManager::connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectRequest {
    pub team_number: Option<u32>,
    pub server_ip: Option<String>,
    pub server_port: Option<u16>,
    pub identity: Option<String>,
}

impl ConnectRequest {
    /// Connect to a robot by team number on the default port.
    pub fn team(team_number: u32) -> Self {
        Self { team_number: Some(team_number), ..Self::default() }
    }

    /// Connect to an explicit server address.
    pub fn address(host: impl Into<String>, port: u16) -> Self {
        Self { server_ip: Some(host.into()), server_port: Some(port), ..Self::default() }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

/// Live connection status, observable through [`ConnectionManager::subscribe_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub target: Option<ServerAddress>,
    pub identity: String,
    pub generation: u64,
    pub reconnect_attempts: u32,
    pub last_transition: SystemTime,
    pub time_sync: TimeSyncInfo,
    pub peer: Option<RemotePeer>,
}

/// What changed, as published on the manager's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicChange {
    Announced(TopicInfo),
    Unannounced { name: String },
    PropertiesChanged { name: String, properties: serde_json::Value },
    ValueChanged { topic: String, value: TimestampedValue },
    /// A link was established; topic state from older generations is stale
    Connected { generation: u64 },
    /// The link of `generation` dropped unexpectedly
    ConnectionLost { generation: u64 },
    /// Explicit teardown
    Closed,
}

/// Sequenced change notification.
///
/// Sequence numbers are assigned in send order, so consumers can tell how far
/// behind the manager they are.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEvent {
    pub seq: u64,
    pub change: TopicChange,
}

/// Owner of the NetworkTables connection
pub struct ConnectionManager {
    client: Arc<dyn NetworkClient>,
    config: Arc<BridgeConfig>,
    status: watch::Sender<ConnectionStatus>,
    generation: AtomicU64,
    /// Serializes connect, disconnect, loss handling and reconnect attempts
    transition: tokio::sync::Mutex<()>,
    /// Token of the current connection lifetime; cancelled by `disconnect`
    lifecycle: watch::Sender<CancellationToken>,
    events: broadcast::Sender<Arc<TopicEvent>>,
    /// Guards sequence assignment and send together
    seq: Mutex<u64>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &*self.status.borrow())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(client: Arc<dyn NetworkClient>, config: Arc<BridgeConfig>) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            target: None,
            identity: config.default_identity.clone(),
            generation: 0,
            reconnect_attempts: 0,
            last_transition: SystemTime::now(),
            time_sync: TimeSyncInfo::default(),
            peer: None,
        });
        let (lifecycle, _) = watch::channel(CancellationToken::new());
        let (events, _) = broadcast::channel(config.event_capacity);

        Arc::new(Self {
            client,
            config,
            status,
            generation: AtomicU64::new(0),
            transition: tokio::sync::Mutex::new(()),
            lifecycle,
            events,
            seq: Mutex::new(0),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect to a server, tearing down any existing session first
    ///
    /// Blocks until the handshake completes or `connect_timeout` elapses. A
    /// timed out or failed attempt is abandoned and leaves the manager
    /// `Disconnected`; background reconnection only applies to links that were
    /// established once. A `disconnect()` or newer `connect()` issued during
    /// the handshake cancels it.
    pub async fn connect(self: &Arc<Self>, request: ConnectRequest) -> Result<ConnectionInfo> {
        let server = self.config.resolve_address(
            request.team_number,
            request.server_ip.as_deref(),
            request.server_port,
        )?;
        let identity = request
            .identity
            .map(|identity| identity.trim().to_string())
            .filter(|identity| !identity.is_empty())
            .unwrap_or_else(|| self.config.default_identity.clone());

        // Stop the previous lifetime's driver and reconnect loop before queueing on the lock
        self.lifecycle.borrow().cancel();
        let _guard = self.transition.lock().await;

        let token = CancellationToken::new();
        self.lifecycle.send_replace(token.clone());

        let previous = self.status.borrow().clone();
        if previous.state.is_connected() {
            info!(server = ?previous.target, generation = previous.generation, "Tearing down previous session");
            self.client.close().await;
            self.publish_event(TopicChange::ConnectionLost { generation: previous.generation });
        }

        info!(%server, %identity, "Connecting to NetworkTables");
        self.set_state(ConnectionState::Connecting, |status| {
            status.target = Some(server.clone());
            status.identity = identity.clone();
            status.reconnect_attempts = 0;
            status.peer = None;
            status.time_sync = TimeSyncInfo::default();
        });

        let timeout = self.config.connect_timeout;
        let opened = tokio::select! {
            _ = token.cancelled() => {
                info!(%server, "Connection attempt cancelled");
                self.client.close().await;
                self.set_state(ConnectionState::Disconnected, |_| {});
                return Err(BridgeError::not_connected("connection attempt cancelled"));
            }
            opened = tokio::time::timeout(timeout, self.client.open(&server, &identity)) => opened,
        };

        match opened {
            Ok(Ok(link)) => {
                let generation = self.establish(link, token);
                info!(%server, generation, "Connected to NetworkTables");
                Ok(self.info())
            }
            Ok(Err(e)) => {
                warn!(%server, error = %e, "Connection attempt failed");
                self.client.close().await;
                self.set_state(ConnectionState::Disconnected, |_| {});
                Err(e)
            }
            Err(_) => {
                warn!(%server, ?timeout, "Connection attempt timed out");
                self.client.close().await;
                self.set_state(ConnectionState::Disconnected, |_| {});
                Err(BridgeError::ConnectionTimeout { target: server.to_string(), duration: timeout })
            }
        }
    }

    /// Tear down the connection; idempotent
    pub async fn disconnect(&self) -> ConnectionInfo {
        self.lifecycle.borrow().cancel();
        let _guard = self.transition.lock().await;

        if self.status.borrow().state == ConnectionState::Closed {
            debug!("Disconnect requested while already closed");
            return self.info();
        }

        self.client.close().await;
        self.set_state(ConnectionState::Closed, |status| {
            status.reconnect_attempts = 0;
            status.peer = None;
            status.time_sync = TimeSyncInfo::default();
        });
        self.publish_event(TopicChange::Closed);
        info!(generation = self.generation(), "Disconnected from NetworkTables");
        self.info()
    }

    /// Snapshot of the connection for the tool surface
    pub fn info(&self) -> ConnectionInfo {
        let status = self.status.borrow();
        let sync = status.time_sync;
        ConnectionInfo {
            state: status.state,
            connected: status.state.is_connected(),
            target: status.target.clone(),
            identity: status.identity.clone(),
            generation: status.generation,
            reconnect_attempts: status.reconnect_attempts,
            last_transition_ms: status
                .last_transition
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis() as u64),
            latency_ms: sync.valid.then(|| sync.rtt_us as f64 / 1000.0),
            time_offset_us: sync.valid.then_some(sync.offset_us),
            remote: status.peer.clone(),
        }
    }

    pub fn time_sync(&self) -> TimeSyncInfo {
        self.status.borrow().time_sync
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Current generation; incremented on every successful (re)connection
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().state.is_connected()
    }

    pub fn ensure_connected(&self) -> Result<()> {
        let state = self.status.borrow().state;
        if !state.is_connected() {
            return Err(BridgeError::not_connected(format!("connection is {state}")));
        }
        Ok(())
    }

    /// Receiver for all topic and connection events published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<TopicEvent>> {
        self.events.subscribe()
    }

    /// Cancellation token of the current connection lifetime
    pub fn lifecycle_token(&self) -> CancellationToken {
        self.lifecycle.borrow().clone()
    }

    /// Sequence number of the most recently published event
    pub fn last_event_seq(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a topic from the network, bounded by `read_timeout`
    pub async fn read(&self, topic: &str) -> Result<TimestampedValue> {
        self.ensure_connected()?;

        let timeout = self.config.read_timeout;
        match tokio::time::timeout(timeout, self.client.read(topic)).await {
            Ok(Ok(Some(value))) => {
                trace!(topic, last_change = value.last_change, "Network read");
                Ok(value)
            }
            Ok(Ok(None)) => Err(BridgeError::unknown_topic(topic)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::client(format!("read of '{topic}' timed out after {timeout:?}"))),
        }
    }

    /// Server-side state of every announced topic, bounded by `read_timeout`
    pub async fn snapshot(&self) -> Result<Vec<TopicSnapshot>> {
        self.ensure_connected()?;

        let timeout = self.config.read_timeout;
        tokio::time::timeout(timeout, self.client.snapshot())
            .await
            .map_err(|_| BridgeError::client(format!("topic snapshot timed out after {timeout:?}")))?
    }

    /// Publish a value through the client
    pub async fn publish(&self, topic: &str, value: &Value) -> Result<()> {
        self.ensure_connected()?;
        self.client.publish(topic, value).await?;
        debug!(topic, kind = %value.kind(), "Published value");
        Ok(())
    }

    fn set_state(&self, state: ConnectionState, update: impl FnOnce(&mut ConnectionStatus)) {
        self.status.send_modify(|status| {
            if status.state != state {
                debug!(from = %status.state, to = %state, "Connection state transition");
            }
            status.state = state;
            status.last_transition = SystemTime::now();
            update(status);
        });
    }

    pub(crate) fn publish_event(&self, change: TopicChange) -> u64 {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;
        // No receivers is fine: nothing is listening yet
        let _ = self.events.send(Arc::new(TopicEvent { seq: *seq, change }));
        *seq
    }

    /// Mark a fresh link as connected and start pumping its events
    ///
    /// Must be called with the transition lock held. Events the client queued
    /// during the handshake are applied before returning, so queries issued
    /// right after `connect` already see the announced topics.
    fn establish(self: &Arc<Self>, link: ClientLink, token: CancellationToken) -> u64 {
        let ClientLink { mut events, peer } = link;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        self.set_state(ConnectionState::Connected, |status| {
            status.generation = generation;
            status.reconnect_attempts = 0;
            status.peer = Some(peer);
            status.time_sync = TimeSyncInfo::default();
        });
        self.publish_event(TopicChange::Connected { generation });

        let mut pending_loss = None;
        let mut replayed = 0usize;
        while let Ok(event) = events.try_recv() {
            replayed += 1;
            if let Some(reason) = self.apply_client_event(event, generation) {
                pending_loss = Some(reason);
                break;
            }
        }
        debug!(generation, replayed, "Applied handshake events");

        Driver::spawn(Arc::downgrade(self), events, token, generation, pending_loss);
        generation
    }

    /// Republish one client event; returns the loss reason if the link ended
    pub(crate) fn apply_client_event(&self, event: ClientEvent, generation: u64) -> Option<String> {
        let change = match event {
            ClientEvent::Announced(info) => TopicChange::Announced(info),
            ClientEvent::Unannounced { name } => TopicChange::Unannounced { name },
            ClientEvent::PropertiesChanged { name, properties } => {
                TopicChange::PropertiesChanged { name, properties }
            }
            ClientEvent::ValueChanged { topic, value } => TopicChange::ValueChanged { topic, value },
            ClientEvent::TimeSync(sync) => {
                self.status.send_if_modified(|status| {
                    if status.generation != generation || status.time_sync == sync {
                        return false;
                    }
                    status.time_sync = sync;
                    true
                });
                trace!(rtt_us = sync.rtt_us, offset_us = sync.offset_us, "Time sync update");
                return None;
            }
            ClientEvent::Disconnected { reason } => return Some(reason),
        };
        self.publish_event(change);
        None
    }

    /// React to an unexpected loss of the link of `generation`
    pub(crate) async fn handle_link_lost(
        self: &Arc<Self>,
        generation: u64,
        reason: String,
        token: CancellationToken,
    ) {
        let guard = self.transition.lock().await;
        if token.is_cancelled() || self.generation() != generation || !self.is_connected() {
            debug!(generation, %reason, "Ignoring loss of a superseded link");
            return;
        }

        warn!(generation, %reason, "NetworkTables connection lost");
        self.set_state(ConnectionState::Disconnected, |status| {
            status.peer = None;
            status.time_sync = TimeSyncInfo::default();
        });
        self.publish_event(TopicChange::ConnectionLost { generation });
        self.client.close().await;
        drop(guard);

        reconnect::spawn(Arc::downgrade(self), token);
    }
}
