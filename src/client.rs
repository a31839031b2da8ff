//! Client trait for the NetworkTables library beneath the bridge

use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::Result;
use crate::types::{RemotePeer, ServerAddress, TimeSyncInfo, TimestampedValue, TopicInfo, Value};

/// Notification delivered by the client library on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A publisher announced a topic (also sent for every existing topic on open)
    Announced(TopicInfo),
    /// The last publisher of a topic went away
    Unannounced { name: String },
    /// Topic properties were updated; `null` values delete keys
    PropertiesChanged { name: String, properties: Json },
    /// A topic value changed (also sent for every current value on open)
    ValueChanged { topic: String, value: TimestampedValue },
    /// Clock synchronisation update
    TimeSync(TimeSyncInfo),
    /// The link was lost; no further events follow
    Disconnected { reason: String },
}

/// Current server-side state of one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSnapshot {
    pub info: TopicInfo,
    pub value: Option<TimestampedValue>,
}

/// An established link to a server.
///
/// Events describing the server's state at handshake time must already be
/// queued on `events` when [`NetworkClient::open`] returns.
#[derive(Debug)]
pub struct ClientLink {
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub peer: RemotePeer,
}

/// Trait for NetworkTables client libraries
///
/// The bridge owns exactly one client and drives its whole lifecycle through
/// this trait: the connection manager opens and closes links, while reads and
/// publishes run concurrently from any task.
#[async_trait::async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    /// Open a link and complete the handshake
    ///
    /// Returns once the server has accepted the client. The caller bounds this
    /// with its own timeout.
    async fn open(&self, target: &ServerAddress, identity: &str) -> Result<ClientLink>;

    /// Close the current link, if any
    ///
    /// Must be idempotent. Dropping the link's event sender is enough to signal
    /// the end of the event stream.
    async fn close(&self);

    /// Read the current value of a topic
    ///
    /// Returns:
    /// - `Ok(Some(value))` - Topic exists and has a value
    /// - `Ok(None)` - No publisher ever announced the topic
    /// - `Err(e)` - Link is down or the read failed
    async fn read(&self, topic: &str) -> Result<Option<TimestampedValue>>;

    /// Every topic currently announced on the link, with its latest value
    ///
    /// Consumers that fell behind the event stream rebuild their view from
    /// this.
    async fn snapshot(&self) -> Result<Vec<TopicSnapshot>>;

    /// Publish a value, announcing the topic if this client has not yet
    ///
    /// Implementations reject values whose kind differs from the topic's
    /// announced kind.
    async fn publish(&self, topic: &str, value: &Value) -> Result<()>;
}
