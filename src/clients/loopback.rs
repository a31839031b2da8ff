//! In-memory NetworkTables server and client
//!
//! [`LoopbackServer`] stands in for a robot: it holds topics, publishes values
//! from the "robot side", and can drop or refuse connections. [`LoopbackClient`]
//! implements [`NetworkClient`] against it. Used for simulation without a
//! robot and for exercising reconnection and sampling behaviour in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::client::{ClientEvent, ClientLink, NetworkClient, TopicSnapshot};
use crate::types::{
    RemotePeer, ServerAddress, TimeSyncInfo, TimestampedValue, TopicInfo, Value,
};
use crate::{BridgeError, Result};

/// Publisher identity used for robot-side publishes.
pub const ROBOT_PUBLISHER: &str = "robot";

/// Protocol version reported to clients.
pub const PROTOCOL_VERSION: &str = "4.1";

#[derive(Debug)]
struct ServerTopic {
    info: TopicInfo,
    value: Option<TimestampedValue>,
}

#[derive(Debug)]
struct ServerState {
    topics: BTreeMap<String, ServerTopic>,
    link: Option<mpsc::UnboundedSender<ClientEvent>>,
    online: bool,
    handshake_delay: Duration,
    read_latency: Duration,
    time_sync: TimeSyncInfo,
    reads: HashMap<String, usize>,
    client_identity: Option<String>,
}

/// Simulated NetworkTables server
#[derive(Debug)]
pub struct LoopbackServer {
    state: Mutex<ServerState>,
    epoch: Instant,
    opens: AtomicUsize,
}

impl LoopbackServer {
    /// Create an online server with no topics
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                topics: BTreeMap::new(),
                link: None,
                online: true,
                handshake_delay: Duration::ZERO,
                read_latency: Duration::ZERO,
                time_sync: TimeSyncInfo { valid: true, rtt_us: 1_200, offset_us: 0 },
                reads: HashMap::new(),
                client_identity: None,
            }),
            epoch: Instant::now(),
            opens: AtomicUsize::new(0),
        })
    }

    /// Client bound to this server
    pub fn client(self: &Arc<Self>) -> LoopbackClient {
        LoopbackClient { server: Arc::clone(self) }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Announce a topic without giving it a value
    pub fn announce(&self, info: TopicInfo) {
        let mut state = self.state();
        let name = info.name.clone();
        state.topics.insert(name, ServerTopic { info: info.clone(), value: None });
        send(&mut state, ClientEvent::Announced(info));
    }

    /// Publish a value from the robot side, announcing the topic if needed
    pub fn publish(&self, topic: &str, value: Value) -> Result<()> {
        let now = self.now_us();
        let mut state = self.state();
        store_value(&mut state, topic, value, ROBOT_PUBLISHER, now)
    }

    /// Remove a topic, notifying the connected client
    pub fn unpublish(&self, topic: &str) {
        let mut state = self.state();
        if state.topics.remove(topic).is_some() {
            send(&mut state, ClientEvent::Unannounced { name: topic.to_string() });
        }
    }

    /// Replace topic properties, notifying the connected client
    pub fn set_properties(&self, topic: &str, properties: Json) {
        let mut state = self.state();
        if let Some(entry) = state.topics.get_mut(topic) {
            entry.info.properties = properties.clone();
            send(&mut state, ClientEvent::PropertiesChanged { name: topic.to_string(), properties });
        }
    }

    /// Drop the current client link as if the network failed
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.state();
        if let Some(link) = state.link.take() {
            info!(reason, "Loopback server dropping client link");
            let _ = link.send(ClientEvent::Disconnected { reason: reason.to_string() });
        }
    }

    /// Take the server on or off the network; going offline drops the link
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
        if !online {
            self.drop_connection("server offline");
        }
    }

    /// Delay applied to every handshake
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.state().handshake_delay = delay;
    }

    /// Delay applied to every client read
    pub fn set_read_latency(&self, latency: Duration) {
        self.state().read_latency = latency;
    }

    /// Report a new time sync to the connected client
    pub fn set_time_sync(&self, time_sync: TimeSyncInfo) {
        let mut state = self.state();
        state.time_sync = time_sync;
        send(&mut state, ClientEvent::TimeSync(time_sync));
    }

    /// Current server-side value of a topic
    pub fn value(&self, topic: &str) -> Option<Value> {
        self.state().topics.get(topic).and_then(|t| t.value.as_ref()).map(|v| v.value.clone())
    }

    /// Announced publisher of a topic
    pub fn publisher(&self, topic: &str) -> Option<String> {
        self.state().topics.get(topic).map(|t| t.info.publisher.clone())
    }

    /// Number of client reads served for a topic
    pub fn read_count(&self, topic: &str) -> usize {
        self.state().reads.get(topic).copied().unwrap_or(0)
    }

    /// Number of successful handshakes
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Whether a client link is currently attached
    pub fn has_client(&self) -> bool {
        self.state().link.is_some()
    }

    /// Identity sent by the most recent client
    pub fn client_identity(&self) -> Option<String> {
        self.state().client_identity.clone()
    }
}

fn send(state: &mut ServerState, event: ClientEvent) {
    if let Some(link) = &state.link {
        if link.send(event).is_err() {
            trace!("Client link receiver gone, detaching");
            state.link = None;
        }
    }
}

fn store_value(
    state: &mut ServerState,
    topic: &str,
    value: Value,
    publisher: &str,
    now: u64,
) -> Result<()> {
    let last_change = match state.topics.get(topic) {
        Some(existing) => {
            value.check_kind(topic, existing.info.kind)?;
            existing.value.as_ref().map_or(now, |v| now.max(v.last_change + 1))
        }
        None => {
            let info = TopicInfo::new(topic, value.kind(), publisher);
            state.topics.insert(topic.to_string(), ServerTopic { info: info.clone(), value: None });
            send(state, ClientEvent::Announced(info));
            now
        }
    };

    let stamped = TimestampedValue::new(value, last_change);
    if let Some(entry) = state.topics.get_mut(topic) {
        entry.value = Some(stamped.clone());
    }
    send(state, ClientEvent::ValueChanged { topic: topic.to_string(), value: stamped });
    Ok(())
}

/// Client half of the loopback pair
#[derive(Debug, Clone)]
pub struct LoopbackClient {
    server: Arc<LoopbackServer>,
}

impl LoopbackClient {
    fn require_link(&self, operation: &str) -> Result<()> {
        if self.server.state().link.is_none() {
            return Err(BridgeError::not_connected(format!("{operation}: no link to server")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NetworkClient for LoopbackClient {
    async fn open(&self, target: &ServerAddress, identity: &str) -> Result<ClientLink> {
        let delay = self.server.state().handshake_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.server.state();
        if !state.online {
            return Err(BridgeError::client_with_source(
                format!("open {target}"),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "server offline"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for topic in state.topics.values() {
            let _ = tx.send(ClientEvent::Announced(topic.info.clone()));
        }
        for topic in state.topics.values() {
            if let Some(value) = &topic.value {
                let _ = tx.send(ClientEvent::ValueChanged {
                    topic: topic.info.name.clone(),
                    value: value.clone(),
                });
            }
        }
        let _ = tx.send(ClientEvent::TimeSync(state.time_sync));

        state.link = Some(tx);
        state.client_identity = Some(identity.to_string());
        self.server.opens.fetch_add(1, Ordering::AcqRel);

        debug!(%target, identity, topics = state.topics.len(), "Loopback handshake complete");

        Ok(ClientLink {
            events: rx,
            peer: RemotePeer {
                remote_id: "loopback".to_string(),
                address: target.clone(),
                protocol_version: PROTOCOL_VERSION.to_string(),
            },
        })
    }

    async fn close(&self) {
        if self.server.state().link.take().is_some() {
            debug!("Loopback client link closed");
        }
    }

    async fn read(&self, topic: &str) -> Result<Option<TimestampedValue>> {
        self.require_link("read")?;

        let latency = self.server.state().read_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.server.state();
        if state.link.is_none() {
            return Err(BridgeError::not_connected("read: link dropped during read"));
        }
        *state.reads.entry(topic.to_string()).or_default() += 1;
        Ok(state.topics.get(topic).and_then(|t| t.value.clone()))
    }

    async fn snapshot(&self) -> Result<Vec<TopicSnapshot>> {
        let state = self.server.state();
        if state.link.is_none() {
            return Err(BridgeError::not_connected("snapshot: no link to server"));
        }
        Ok(state
            .topics
            .values()
            .map(|topic| TopicSnapshot { info: topic.info.clone(), value: topic.value.clone() })
            .collect())
    }

    async fn publish(&self, topic: &str, value: &Value) -> Result<()> {
        let now = self.server.now_us();
        let mut state = self.server.state();
        if state.link.is_none() {
            return Err(BridgeError::not_connected("publish: no link to server"));
        }
        let publisher = state.client_identity.clone().unwrap_or_default();
        store_value(&mut state, topic, value.clone(), &publisher, now)
    }
}
