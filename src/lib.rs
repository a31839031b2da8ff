//! Resilient NetworkTables bridge for request/response tool calls.
//!
//! ntbridge keeps one logical connection to a robot's NetworkTables server
//! and exposes the robot's topics through short, bounded operations: reads,
//! writes, discovery and time-boxed sampling. It is meant to sit behind an
//! agent-facing tool protocol where every call must return promptly.
//!
//! # Features
//!
//! - **Resilient connection**: automatic reconnection with exponential backoff,
//!   tracked by a generation counter so stale data is never served
//! - **Read-through cache**: a short TTL cache with concurrent fetch sharing
//! - **Strict typing**: JSON arguments are coerced to the topic's declared kind
//! - **Bounded subscriptions**: snapshot-then-delta sampling with burst coalescing
//! - **Batch operations**: per-entry outcomes in input order, best effort
//!
//! # Quick Start
//!
//! ```rust
//! use ntbridge::{Bridge, BridgeConfig, ConnectRequest, Value};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ntbridge::Result<()> {
//! let (bridge, robot) = Bridge::loopback(BridgeConfig::default())?;
//! robot.publish("/SmartDashboard/Enabled", Value::Boolean(false))?;
//!
//! bridge.connect(ConnectRequest::address("127.0.0.1", 5810)).await?;
//!
//! let reply = bridge.call("nt_get", json!({ "topic": "/SmartDashboard/Enabled" })).await?;
//! assert_eq!(reply["value"], false);
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod config;
pub mod logging;
pub mod types;

// Network plumbing
pub mod client;
pub mod clients;
pub mod connection;
pub mod driver;
pub mod stream;

// Components layered on the connection
pub mod batch;
pub mod cache;
pub mod registry;
pub mod resources;
pub mod sampling;

// Tool-call surface
pub mod bridge;
pub mod tools;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use bridge::Bridge;
pub use client::{ClientEvent, ClientLink, NetworkClient, TopicSnapshot};
pub use clients::{LoopbackClient, LoopbackServer};
pub use config::{BridgeConfig, Profile, ReconnectConfig};
pub use connection::{ConnectRequest, ConnectionManager};
pub use sampling::{CompletionReason, Sample, SubscriptionResult};
pub use tools::{ToolSpec, tool_catalog};
