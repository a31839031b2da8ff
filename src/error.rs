//! Error types for bridge operations.
//!
//! Every fallible operation in the crate returns [`BridgeError`]. The variants
//! follow the failure taxonomy of the tool-call surface, so a caller can map
//! an error onto a tool result without inspecting message strings.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: bad or ambiguous connect parameters, unreadable config files
//! - **Connection Errors**: handshake timeouts and operations attempted while disconnected
//! - **Topic Errors**: unknown topics and values whose kind does not match the topic
//! - **Argument Errors**: malformed tool arguments such as a non-positive duration
//! - **Client Errors**: failures reported by the underlying NetworkTables client
//!
//! ## Recovery and Retry
//!
//! Connection faults are retried by the connection manager itself and only
//! reach callers as [`BridgeError::NotConnected`]. Whether a caller should retry
//! is exposed through [`BridgeError::is_retryable`]:
//!
//! ```rust
//! use ntbridge::BridgeError;
//!
//! let error = BridgeError::not_connected("robot is off");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! Errors are `Clone` so that a single failed network fetch can be handed to
//! every reader that was waiting on it.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Main error type for bridge operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Invalid connection configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Connection to {target} timed out after {duration:?}")]
    ConnectionTimeout { target: String, duration: Duration },

    #[error("Not connected to NetworkTables: {reason}")]
    NotConnected { reason: String },

    #[error("Topic '{topic}' is unknown")]
    UnknownTopic { topic: String },

    #[error("Type mismatch on '{topic}': declared {expected}, got {found}")]
    TypeMismatch { topic: String, expected: String, found: String },

    #[error("Invalid argument '{argument}': {details}")]
    InvalidArgument { argument: String, details: String },

    #[error("NetworkTables client error during {operation}")]
    Client {
        operation: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },
}

impl BridgeError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::ConnectionTimeout { .. } => true,
            BridgeError::NotConnected { .. } => true,
            BridgeError::Client { .. } => true,
            BridgeError::InvalidConfiguration { .. } => false,
            BridgeError::UnknownTopic { .. } => false,
            BridgeError::TypeMismatch { .. } => false,
            BridgeError::InvalidArgument { .. } => false,
            BridgeError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BridgeError::InvalidConfiguration { .. } => vec![
                "Provide either a team number or an explicit server address",
                "Check the team number is between 1 and 25599",
                "Use a non-zero server port",
            ],
            BridgeError::ConnectionTimeout { .. } => vec![
                "Check the robot is powered and on the same network",
                "Verify the team number or server address",
                "Increase the connect timeout",
            ],
            BridgeError::NotConnected { .. } => vec![
                "Call nt_connect before reading or writing topics",
                "Wait for the automatic reconnection to complete",
                "Check the connection state with nt_connection_info",
            ],
            BridgeError::UnknownTopic { .. } => vec![
                "Check the topic path spelling, including the leading '/'",
                "List available topics with nt_list_topics",
                "Make sure the robot code publishes the topic",
            ],
            BridgeError::TypeMismatch { .. } => vec![
                "Check the declared type with nt_get_info",
                "Send a value of the declared kind",
                "Use nt_set_array for array topics",
            ],
            BridgeError::InvalidArgument { .. } => vec![
                "Check the tool arguments against the tool description",
                "Use a positive subscription duration within the configured maximum",
            ],
            BridgeError::Client { .. } => vec![
                "Retry the operation",
                "Check the NetworkTables server logs",
                "Reconnect with nt_connect",
            ],
            BridgeError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Verify the YAML keys and value units (seconds)",
            ],
        }
    }

    /// Stable machine-readable code used in tool results.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidConfiguration { .. } => "invalid_configuration",
            BridgeError::ConnectionTimeout { .. } => "connection_timeout",
            BridgeError::NotConnected { .. } => "not_connected",
            BridgeError::UnknownTopic { .. } => "unknown_topic",
            BridgeError::TypeMismatch { .. } => "type_mismatch",
            BridgeError::InvalidArgument { .. } => "invalid_argument",
            BridgeError::Client { .. } => "client_error",
            BridgeError::Config { .. } => "config_error",
        }
    }

    /// Helper constructor for configuration errors on connect.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        BridgeError::InvalidConfiguration { reason: reason.into() }
    }

    /// Helper constructor for operations attempted without a live connection.
    pub fn not_connected(reason: impl Into<String>) -> Self {
        BridgeError::NotConnected { reason: reason.into() }
    }

    /// Helper constructor for unknown topics.
    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        BridgeError::UnknownTopic { topic: topic.into() }
    }

    /// Helper constructor for type mismatches.
    pub fn type_mismatch(
        topic: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        BridgeError::TypeMismatch {
            topic: topic.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Helper constructor for invalid tool arguments.
    pub fn invalid_argument(argument: impl Into<String>, details: impl Into<String>) -> Self {
        BridgeError::InvalidArgument { argument: argument.into(), details: details.into() }
    }

    /// Helper constructor for client failures.
    pub fn client(operation: impl Into<String>) -> Self {
        BridgeError::Client { operation: operation.into(), source: None }
    }

    /// Helper constructor for client failures with source.
    pub fn client_with_source(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BridgeError::Client { operation: operation.into(), source: Some(Arc::new(source)) }
    }

    /// Helper constructor for configuration file errors.
    pub fn config(context: impl Into<String>, details: impl ToString) -> Self {
        BridgeError::Config { context: context.into(), details: details.to_string() }
    }
}

/// Tool results carry errors as `{ "code", "message", "retryable" }`.
impl serde::Serialize for BridgeError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("code", self.code())?;
        map.serialize_entry("message", &self.to_string())?;
        map.serialize_entry("retryable", &self.is_retryable())?;
        map.end()
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidArgument { argument: "arguments".to_string(), details: err.to_string() }
    }
}
