//! Connection lifecycle and health types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the NetworkTables connection.
///
/// `Disconnected → Connecting → Connected → Disconnected (fault) → Connecting (retry)`,
/// and `Closed` after an explicit teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub const fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Resolved server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Clock synchronisation with the server, as reported by the client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSyncInfo {
    /// Whether a time sync has been established on the current connection
    pub valid: bool,
    /// Round-trip time in microseconds
    pub rtt_us: u64,
    /// Server time minus local time, in microseconds
    pub offset_us: i64,
}

/// Details about the remote peer once a handshake has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePeer {
    pub remote_id: String,
    pub address: ServerAddress,
    pub protocol_version: String,
}

/// Snapshot of the connection returned by `connect` and `connection_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub connected: bool,
    pub target: Option<ServerAddress>,
    pub identity: String,
    /// Incremented on every successful (re)connection
    pub generation: u64,
    /// Reconnection attempts since the connection was last established
    pub reconnect_attempts: u32,
    /// Unix time of the last state transition, in milliseconds
    pub last_transition_ms: u64,
    /// Round-trip latency estimate from time sync, in milliseconds
    pub latency_ms: Option<f64>,
    /// Server clock offset from time sync, in microseconds
    pub time_offset_us: Option<i64>,
    pub remote: Option<RemotePeer>,
}
