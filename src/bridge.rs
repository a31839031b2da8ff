//! The tool-call surface

use serde_json::{Value as Json, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::batch::{BatchCoordinator, Reading, TopicOutcome};
use crate::cache::ReadCache;
use crate::client::NetworkClient;
use crate::clients::LoopbackServer;
use crate::config::BridgeConfig;
use crate::connection::{ConnectRequest, ConnectionManager};
use crate::registry::TopicRegistry;
use crate::resources::{self, ResourceEntry};
use crate::sampling::{SamplingSession, SubscriptionEngine, SubscriptionResult};
use crate::types::{ConnectionInfo, TimeSyncInfo, TopicDescriptor, TopicFilter, Value};
use crate::Result;

/// NetworkTables bridge exposing every tool-call operation.
///
/// A bridge owns one connection manager and the components layered on it.
/// Construct it inside a tokio runtime: the registry and cache spawn their
/// event consumers on creation.
///
/// # Examples
///
/// ```rust
/// use ntbridge::{Bridge, BridgeConfig, ConnectRequest, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ntbridge::Result<()> {
/// let (bridge, robot) = Bridge::loopback(BridgeConfig::default())?;
/// robot.publish("/SmartDashboard/Battery Voltage", Value::Double(12.6))?;
///
/// bridge.connect(ConnectRequest::address("127.0.0.1", 5810)).await?;
/// let reading = bridge.get("/SmartDashboard/Battery Voltage", true).await?;
/// assert_eq!(reading.value, Value::Double(12.6));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Bridge {
    manager: Arc<ConnectionManager>,
    registry: Arc<TopicRegistry>,
    cache: Arc<ReadCache>,
    batch: BatchCoordinator,
    sampling: SubscriptionEngine,
}

impl Bridge {
    /// Build a bridge around a client library
    pub fn new(client: Arc<dyn NetworkClient>, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let ttl = config.effective_cache_ttl();
        info!(profile = ?config.profile, ?ttl, "Creating NetworkTables bridge");

        let manager = ConnectionManager::new(client, Arc::new(config));
        let registry = TopicRegistry::spawn(Arc::clone(&manager));
        let cache = ReadCache::spawn(Arc::clone(&manager), ttl);
        let batch = BatchCoordinator::new(Arc::clone(&manager), Arc::clone(&cache), Arc::clone(&registry));
        let sampling = SubscriptionEngine::new(Arc::clone(&manager), Arc::clone(&registry));

        Ok(Self { manager, registry, cache, batch, sampling })
    }

    /// Bridge wired to an in-memory robot, for simulation without hardware
    pub fn loopback(config: BridgeConfig) -> Result<(Self, Arc<LoopbackServer>)> {
        let server = LoopbackServer::new();
        let bridge = Self::new(Arc::new(server.client()), config)?;
        Ok((bridge, server))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectionInfo> {
        self.manager.connect(request).await
    }

    /// Close the connection, drop every cache entry and end running subscriptions
    pub async fn disconnect(&self) -> ConnectionInfo {
        let info = self.manager.disconnect().await;
        self.cache.invalidate_all();
        info
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.manager.info()
    }

    pub fn time_sync_info(&self) -> TimeSyncInfo {
        self.manager.time_sync()
    }

    pub async fn get(&self, topic: &str, use_cache: bool) -> Result<Reading> {
        self.batch.get(topic, use_cache).await
    }

    pub async fn get_multiple(&self, topics: &[String], use_cache: bool) -> Vec<TopicOutcome<Reading>> {
        self.batch.get_multiple(topics, use_cache).await
    }

    /// Write a JSON value, coerced to the topic's declared kind
    pub async fn set(&self, topic: &str, value: &Json) -> Result<()> {
        self.batch.set_json(topic, value).await
    }

    /// Write an already typed value
    pub async fn set_value(&self, topic: &str, value: Value) -> Result<()> {
        self.batch.set(topic, value).await
    }

    /// Write an array passed as a JSON-encoded string
    pub async fn set_array(&self, topic: &str, encoded: &str) -> Result<()> {
        self.batch.set_array_json(topic, encoded).await
    }

    pub async fn set_multiple(&self, updates: &[(String, Json)]) -> Vec<TopicOutcome<()>> {
        self.batch.set_multiple(updates).await
    }

    /// Known topics matching `prefix`, sorted by path
    pub async fn list_topics(&self, prefix: Option<&str>) -> Vec<TopicDescriptor> {
        let filter = prefix.map(TopicFilter::new).unwrap_or_default();
        self.registry.list(&filter).await
    }

    pub async fn get_info(&self, topic: &str) -> Result<TopicDescriptor> {
        self.registry.describe(topic).await
    }

    /// Capture `topics` for `duration_secs` seconds
    pub async fn subscribe(&self, topics: &[String], duration_secs: f64) -> Result<SubscriptionResult> {
        self.sampling.subscribe(topics, duration_secs).await
    }

    /// Capture `topics` plus everything under `prefixes` for `duration_secs` seconds
    pub async fn subscribe_with_prefixes(
        &self,
        topics: &[String],
        prefixes: &[String],
        duration_secs: f64,
    ) -> Result<SubscriptionResult> {
        self.sampling.subscribe_with_prefixes(topics, prefixes, duration_secs).await
    }

    /// Start a subscription that the caller drives sample by sample
    pub async fn open_subscription(&self, topics: &[String], duration_secs: f64) -> Result<SamplingSession> {
        self.sampling.open(topics, duration_secs).await
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    /// Change the cache TTL at runtime
    pub fn configure_cache(&self, ttl: Duration) {
        self.cache.set_ttl(ttl);
    }

    /// Resource entries for every known topic
    pub async fn list_resources(&self) -> Vec<ResourceEntry> {
        self.registry.list(&TopicFilter::all()).await.iter().map(ResourceEntry::for_topic).collect()
    }

    /// Read a resource: the root listing or one topic
    pub async fn read_resource(&self, uri: &str) -> Result<Json> {
        if uri == resources::ROOT_URI {
            let entries = self.list_resources().await;
            debug!(resources = entries.len(), "Listing topic resources");
            return Ok(json!({ "uri": uri, "resources": entries }));
        }

        let topic = resources::topic_from_uri(uri)?;
        let descriptor = self.registry.describe(&topic).await?;
        let reading = self.batch.get(&topic, true).await?;
        Ok(json!({ "uri": uri, "topic_info": descriptor, "value": reading }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;
    use crate::types::{ConnectionState, ValueKind};

    async fn connected() -> (Bridge, Arc<LoopbackServer>) {
        let (bridge, server) = Bridge::loopback(BridgeConfig::default()).unwrap();
        server.publish("/SmartDashboard/Battery Voltage", Value::Double(12.6)).unwrap();
        server.publish("/SmartDashboard/Enabled", Value::Boolean(true)).unwrap();
        bridge.connect(ConnectRequest::address("127.0.0.1", 5810)).await.unwrap();
        (bridge, server)
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let config = BridgeConfig { read_timeout: Duration::ZERO, ..BridgeConfig::default() };
        assert!(Bridge::loopback(config).is_err());
    }

    #[tokio::test]
    async fn profile_sets_initial_ttl() {
        let config = BridgeConfig::for_profile(crate::config::Profile::Competition);
        let (bridge, _server) = Bridge::loopback(config).unwrap();
        assert_eq!(bridge.cache_ttl(), Duration::from_millis(50));

        bridge.configure_cache(Duration::from_millis(5));
        assert_eq!(bridge.cache_ttl(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn disconnect_clears_topics() {
        let (bridge, _server) = connected().await;
        assert_eq!(bridge.list_topics(None).await.len(), 2);

        let info = bridge.disconnect().await;
        assert_eq!(info.state, ConnectionState::Closed);
        assert!(bridge.list_topics(None).await.is_empty());
        assert!(matches!(
            bridge.get("/SmartDashboard/Enabled", true).await,
            Err(BridgeError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn resources_list_and_read() {
        let (bridge, _server) = connected().await;

        let entries = bridge.list_resources().await;
        assert_eq!(entries[0].uri, "nt://SmartDashboard/Battery%20Voltage");

        let root = bridge.read_resource(resources::ROOT_URI).await.unwrap();
        assert_eq!(root["resources"].as_array().map(Vec::len), Some(2));

        let topic = bridge.read_resource("nt://SmartDashboard/Battery%20Voltage").await.unwrap();
        assert_eq!(topic["topic_info"]["type"], "double");
        assert_eq!(topic["value"]["value"], 12.6);

        let missing = bridge.read_resource("nt://Nope").await.unwrap_err();
        assert!(matches!(missing, BridgeError::UnknownTopic { .. }));
    }

    #[tokio::test]
    async fn new_topics_are_inferred_from_json() {
        let (bridge, server) = connected().await;

        bridge.set("/Agent/Targets", &serde_json::json!([1, 2, 3])).await.unwrap();
        assert_eq!(server.value("/Agent/Targets"), Some(Value::IntegerArray(vec![1, 2, 3])));

        // The announcement travels through the event pump
        let info = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(info) = bridge.get_info("/Agent/Targets").await {
                    break info;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(info.kind, ValueKind::IntegerArray);
        assert_eq!(info.publisher, crate::config::DEFAULT_IDENTITY);
    }
}
