//! Bridge configuration and deployment profiles.
//!
//! Configuration is plain serde data so it can be embedded in a host's own
//! config or loaded from YAML. Durations are written in seconds:
//!
//! ```yaml
//! profile: competition
//! cache_ttl: 0.05
//! max_subscription_duration: 120
//! reconnect:
//!   initial_delay: 0.25
//!   max_delay: 5
//!   max_attempts: 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::ServerAddress;
use crate::{BridgeError, Result};

/// Default NetworkTables 4 server port.
pub const DEFAULT_PORT: u16 = 5810;

/// Default client identity announced to the server.
pub const DEFAULT_IDENTITY: &str = "MCP-NT-Server";

/// Deployment profile selecting freshness defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Field network during matches: tight freshness
    Competition,
    /// Practice field / pit
    #[default]
    Practice,
    /// Robot simulation on the local machine
    Simulation,
    /// Cache disabled, every read goes to the network
    Disabled,
}

impl Profile {
    /// Default cache TTL for this profile.
    pub const fn cache_ttl(self) -> Duration {
        match self {
            Profile::Competition => Duration::from_millis(50),
            Profile::Practice => Duration::from_millis(100),
            Profile::Simulation => Duration::from_millis(200),
            Profile::Disabled => Duration::ZERO,
        }
    }
}

/// Rule resolving a team number to a robot address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamAddressRule {
    /// `10.TE.AM.2` on the robot radio network
    #[default]
    Static,
    /// `roborio-TEAM-frc.local` via mDNS
    Mdns,
}

impl TeamAddressRule {
    /// Highest team number the static `10.TE.AM.2` scheme can express.
    pub const MAX_TEAM: u32 = 25599;

    /// Resolve a team number to a host name or address.
    pub fn resolve(self, team: u32) -> Result<String> {
        if team == 0 || team > Self::MAX_TEAM {
            return Err(BridgeError::invalid_configuration(format!(
                "team number {team} is outside 1..={}",
                Self::MAX_TEAM
            )));
        }

        let host = match self {
            TeamAddressRule::Static => format!("10.{}.{}.2", team / 100, team % 100),
            TeamAddressRule::Mdns => format!("roborio-{team}-frc.local"),
        };
        Ok(host)
    }
}

/// Reconnection backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    #[serde(with = "secs")]
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    #[serde(with = "secs")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Give up after this many attempts; `None` retries until disconnected
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based): exponential, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub profile: Profile,
    /// Cache TTL override; the profile default applies when absent
    #[serde(with = "opt_secs")]
    pub cache_ttl: Option<Duration>,
    /// Longest subscription a caller may request
    #[serde(with = "secs")]
    pub max_subscription_duration: Duration,
    /// Changes closer together than this are merged into one sample
    #[serde(with = "secs")]
    pub coalesce_window: Duration,
    /// Bound on the handshake wait in `connect`
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Bound on a single network read
    #[serde(with = "secs")]
    pub read_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub team_address_rule: TeamAddressRule,
    pub default_port: u16,
    pub default_identity: String,
    /// Capacity of the internal topic event channel
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            cache_ttl: None,
            max_subscription_duration: Duration::from_secs(300),
            coalesce_window: Duration::from_millis(5),
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            team_address_rule: TeamAddressRule::default(),
            default_port: DEFAULT_PORT,
            default_identity: DEFAULT_IDENTITY.to_string(),
            event_capacity: 4096,
        }
    }
}

impl BridgeConfig {
    /// Defaults for a deployment profile.
    pub fn for_profile(profile: Profile) -> Self {
        Self { profile, ..Self::default() }
    }

    /// Effective cache TTL.
    pub fn effective_cache_ttl(&self) -> Duration {
        self.cache_ttl.unwrap_or_else(|| self.profile.cache_ttl())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| BridgeError::config("configuration YAML", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::config(path.display().to_string(), e))?;
        debug!(path = %path.display(), bytes = yaml.len(), "Loaded bridge configuration");
        Self::from_yaml_str(&yaml)
    }

    /// Check values that serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        if self.max_subscription_duration.is_zero() {
            return Err(BridgeError::config(
                "max_subscription_duration",
                "must be greater than zero",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(BridgeError::config("connect_timeout", "must be greater than zero"));
        }
        if self.read_timeout.is_zero() {
            return Err(BridgeError::config("read_timeout", "must be greater than zero"));
        }
        if self.default_port == 0 {
            return Err(BridgeError::config("default_port", "must not be 0"));
        }
        if self.event_capacity == 0 {
            return Err(BridgeError::config("event_capacity", "must be greater than zero"));
        }
        if !(self.reconnect.backoff_factor >= 1.0) {
            return Err(BridgeError::config("reconnect.backoff_factor", "must be at least 1.0"));
        }
        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(BridgeError::config(
                "reconnect.initial_delay",
                "must not exceed reconnect.max_delay",
            ));
        }
        Ok(())
    }

    /// Resolve connect parameters to a server address.
    ///
    /// An explicit `server_ip` takes precedence over `team_number`. Without
    /// either the request is rejected.
    pub fn resolve_address(
        &self,
        team_number: Option<u32>,
        server_ip: Option<&str>,
        server_port: Option<u16>,
    ) -> Result<ServerAddress> {
        let port = server_port.unwrap_or(self.default_port);
        if port == 0 {
            return Err(BridgeError::invalid_configuration("server port must not be 0"));
        }

        match (server_ip, team_number) {
            (Some(ip), team) => {
                let host = ip.trim();
                if host.is_empty() {
                    return Err(BridgeError::invalid_configuration("server_ip is empty"));
                }
                if let Some(team) = team {
                    debug!(team, host, "Explicit server address overrides team number");
                }
                Ok(ServerAddress::new(host, port))
            }
            (None, Some(team)) => Ok(ServerAddress::new(self.team_address_rule.resolve(team)?, port)),
            (None, None) => Err(BridgeError::invalid_configuration(
                "either team_number or server_ip is required",
            )),
        }
    }
}

/// Serde helpers writing `Duration` as fractional seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
