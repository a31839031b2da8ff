//! Topic registry fed by connection events
//!
//! The registry never polls the network. A consumer task applies every
//! [`TopicEvent`] the connection manager publishes, and queries first wait
//! until the registry has caught up with the events published before them.
//!
//! A consumer that falls behind the bounded event channel has lost events it
//! cannot replay, so it rebuilds the whole registry from the client's topic
//! snapshot and skips the buffered events the snapshot already covers.

use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionManager, TopicChange, TopicEvent};
use crate::types::{TimestampedValue, TopicDescriptor, TopicFilter, TopicInfo, ValueKind};
use crate::{BridgeError, Result};

/// Upper bound on how long a query waits for the consumer to catch up.
const CATCH_UP_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct TopicRecord {
    info: TopicInfo,
    last_value: Option<TimestampedValue>,
    dirty: bool,
}

impl TopicRecord {
    fn descriptor(&self) -> TopicDescriptor {
        TopicDescriptor {
            name: self.info.name.clone(),
            kind: self.info.kind,
            type_str: self.info.type_str.clone(),
            publisher: self.info.publisher.clone(),
            last_change: self.last_value.as_ref().map(|v| v.last_change),
            properties: self.info.properties.clone(),
            dirty: self.dirty,
        }
    }
}

/// Known topics of the current connection session
#[derive(Debug)]
pub struct TopicRegistry {
    manager: Arc<ConnectionManager>,
    topics: RwLock<BTreeMap<String, TopicRecord>>,
    /// Sequence number of the last applied event
    applied: watch::Sender<u64>,
}

impl TopicRegistry {
    /// Create the registry and spawn its event consumer
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: Arc<ConnectionManager>) -> Arc<Self> {
        let events = manager.subscribe_events();
        let (applied, _) = watch::channel(manager.last_event_seq());
        let registry = Arc::new(Self { manager, topics: RwLock::new(BTreeMap::new()), applied });

        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move { Self::consume(weak, events).await });
        registry
    }

    async fn consume(registry: Weak<Self>, mut events: broadcast::Receiver<Arc<TopicEvent>>) {
        debug!("Topic registry consumer started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(registry) = registry.upgrade() else { break };
                    if event.seq <= *registry.applied.borrow() {
                        continue;
                    }
                    registry.apply(&event);
                    registry.applied.send_replace(event.seq);
                }
                Err(RecvError::Lagged(skipped)) => {
                    let Some(registry) = registry.upgrade() else { break };
                    warn!(skipped, "Topic registry fell behind the event channel, resynchronizing");
                    registry.resync().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Topic registry consumer ended");
    }

    fn read_topics(&self) -> RwLockReadGuard<'_, BTreeMap<String, TopicRecord>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, BTreeMap<String, TopicRecord>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &TopicEvent) {
        let mut topics = self.write_topics();
        match &event.change {
            TopicChange::Connected { generation } => {
                debug!(generation, stale = topics.len(), "Clearing registry for new session");
                topics.clear();
            }
            TopicChange::Closed => {
                info!(topics = topics.len(), "Clearing registry on disconnect");
                topics.clear();
            }
            TopicChange::ConnectionLost { .. } => {}
            TopicChange::Announced(info) => match topics.get_mut(&info.name) {
                Some(record) if record.info.kind != info.kind => {
                    warn!(
                        topic = %info.name,
                        declared = %record.info.kind,
                        announced = %info.kind,
                        "Ignoring re-announcement with a different kind"
                    );
                }
                Some(record) => {
                    record.info.publisher = info.publisher.clone();
                    record.info.type_str = info.type_str.clone();
                    record.info.properties = info.properties.clone();
                }
                None => {
                    trace!(topic = %info.name, kind = %info.kind, "Topic announced");
                    topics.insert(
                        info.name.clone(),
                        TopicRecord { info: info.clone(), last_value: None, dirty: false },
                    );
                }
            },
            TopicChange::Unannounced { name } => {
                if topics.remove(name).is_some() {
                    trace!(topic = %name, "Topic unannounced");
                }
            }
            TopicChange::PropertiesChanged { name, properties } => {
                if let Some(record) = topics.get_mut(name) {
                    merge_properties(&mut record.info.properties, properties);
                }
            }
            TopicChange::ValueChanged { topic, value } => {
                let record = topics.entry(topic.clone()).or_insert_with(|| TopicRecord {
                    info: TopicInfo::new(topic.clone(), value.value.kind(), ""),
                    last_value: None,
                    dirty: false,
                });
                if record.info.kind != value.value.kind() {
                    warn!(
                        topic = %topic,
                        declared = %record.info.kind,
                        found = %value.value.kind(),
                        "Dropping value of the wrong kind"
                    );
                    return;
                }
                record.last_value = Some(value.clone());
                record.dirty = true;
            }
        }
    }

    /// Replace every record with the client's current view of the server
    ///
    /// Events up to the sequence number observed before the snapshot was
    /// requested are reflected in it and will be skipped.
    async fn resync(&self) {
        let covered = self.manager.last_event_seq();
        let topics: BTreeMap<String, TopicRecord> = match self.manager.snapshot().await {
            Ok(snapshot) => snapshot
                .into_iter()
                .map(|topic| {
                    let record = TopicRecord {
                        dirty: topic.value.is_some(),
                        last_value: topic.value,
                        info: topic.info,
                    };
                    (record.info.name.clone(), record)
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "No topic snapshot available, clearing registry");
                BTreeMap::new()
            }
        };

        info!(topics = topics.len(), covered, "Topic registry resynchronized");
        *self.write_topics() = topics;
        self.applied.send_replace(covered);
    }

    /// Wait until every event published before this call has been applied
    async fn catch_up(&self) {
        let target = self.manager.last_event_seq();
        let mut applied = self.applied.subscribe();
        if *applied.borrow() >= target {
            return;
        }
        if tokio::time::timeout(CATCH_UP_TIMEOUT, applied.wait_for(|seq| *seq >= target)).await.is_err() {
            debug!(target, "Registry query proceeding before catch-up");
        }
    }

    /// Descriptors of all matching topics, sorted by path
    pub async fn list(&self, filter: &TopicFilter) -> Vec<TopicDescriptor> {
        self.catch_up().await;
        self.read_topics()
            .values()
            .filter(|record| filter.matches(&record.info.name))
            .map(TopicRecord::descriptor)
            .collect()
    }

    /// Names of all matching topics, sorted by path
    pub async fn resolve(&self, filter: &TopicFilter) -> Vec<String> {
        self.catch_up().await;
        self.read_topics().keys().filter(|name| filter.matches(name)).cloned().collect()
    }

    pub async fn describe(&self, topic: &str) -> Result<TopicDescriptor> {
        self.catch_up().await;
        self.read_topics()
            .get(topic)
            .map(TopicRecord::descriptor)
            .ok_or_else(|| BridgeError::unknown_topic(topic))
    }

    /// Declared kind of a topic, if it has been announced
    pub async fn declared_kind(&self, topic: &str) -> Option<ValueKind> {
        self.catch_up().await;
        self.read_topics().get(topic).map(|record| record.info.kind)
    }

    /// Clear the dirty flag after a read
    pub fn mark_read(&self, topic: &str) {
        if let Some(record) = self.write_topics().get_mut(topic) {
            record.dirty = false;
        }
    }
}

/// Merge a property update; `null` values delete keys
fn merge_properties(target: &mut Json, update: &Json) {
    let Json::Object(update) = update else {
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Json::Object(existing) = target {
        for (key, value) in update {
            if value.is_null() {
                existing.remove(key);
            } else {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LoopbackServer;
    use crate::config::BridgeConfig;
    use crate::connection::ConnectRequest;
    use crate::types::Value;
    use serde_json::json;

    async fn connected() -> (Arc<LoopbackServer>, Arc<ConnectionManager>, Arc<TopicRegistry>) {
        let server = LoopbackServer::new();
        server.publish("/SmartDashboard/Battery Voltage", Value::Double(12.4)).unwrap();
        server.publish("/SmartDashboard/Enabled", Value::Boolean(false)).unwrap();
        server.publish("/Shuffleboard/Auto/Mode", Value::String("Two Note".into())).unwrap();
        server.announce(TopicInfo::new("/FMSInfo/MatchNumber", ValueKind::Integer, "fms"));

        let manager = ConnectionManager::new(Arc::new(server.client()), Arc::new(BridgeConfig::default()));
        let registry = TopicRegistry::spawn(Arc::clone(&manager));
        manager.connect(ConnectRequest::address("127.0.0.1", 5810)).await.unwrap();
        (server, manager, registry)
    }

    fn event(change: TopicChange) -> TopicEvent {
        TopicEvent { seq: 0, change }
    }

    #[tokio::test]
    async fn list_is_sorted_and_filtered() {
        let (_server, _manager, registry) = connected().await;

        let all: Vec<String> = registry.list(&TopicFilter::all()).await.into_iter().map(|d| d.name).collect();
        assert_eq!(
            all,
            vec![
                "/FMSInfo/MatchNumber",
                "/Shuffleboard/Auto/Mode",
                "/SmartDashboard/Battery Voltage",
                "/SmartDashboard/Enabled",
            ]
        );

        let dashboard = registry.resolve(&TopicFilter::new("/SmartDashboard/")).await;
        assert_eq!(dashboard.len(), 2);

        let globbed = registry.resolve(&TopicFilter::new("/*/Enabled")).await;
        assert_eq!(globbed, vec!["/SmartDashboard/Enabled"]);
    }

    #[tokio::test]
    async fn describe_reports_metadata() {
        let (_server, _manager, registry) = connected().await;

        let descriptor = registry.describe("/SmartDashboard/Battery Voltage").await.unwrap();
        assert_eq!(descriptor.kind, ValueKind::Double);
        assert_eq!(descriptor.type_str, "double");
        assert_eq!(descriptor.publisher, "robot");
        assert!(descriptor.last_change.is_some());
        assert!(descriptor.dirty);

        let match_number = registry.describe("/FMSInfo/MatchNumber").await.unwrap();
        assert_eq!(match_number.last_change, None);

        let err = registry.describe("/nope").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTopic { .. }));
    }

    #[tokio::test]
    async fn new_topics_visible_after_publish() {
        let (server, _manager, registry) = connected().await;
        server.publish("/SmartDashboard/Arm Angle", Value::Double(42.0)).unwrap();

        // Delivered through the event pump; the read barrier covers the hop
        tokio::task::yield_now().await;
        let kind = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(kind) = registry.declared_kind("/SmartDashboard/Arm Angle").await {
                    break kind;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(kind, ValueKind::Double);
    }

    #[tokio::test]
    async fn unannounce_and_disconnect_remove_topics() {
        let (server, manager, registry) = connected().await;

        server.unpublish("/SmartDashboard/Enabled");
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.declared_kind("/SmartDashboard/Enabled").await.is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        manager.disconnect().await;
        assert!(registry.list(&TopicFilter::all()).await.is_empty());
    }

    #[tokio::test]
    async fn dirty_flag_cleared_by_read() {
        let (_server, _manager, registry) = connected().await;
        registry.mark_read("/SmartDashboard/Enabled");
        assert!(!registry.describe("/SmartDashboard/Enabled").await.unwrap().dirty);
    }

    #[tokio::test]
    async fn first_kind_wins() {
        let (_server, _manager, registry) = connected().await;

        registry.apply(&event(TopicChange::Announced(TopicInfo::new(
            "/SmartDashboard/Enabled",
            ValueKind::String,
            "other",
        ))));
        registry.apply(&event(TopicChange::ValueChanged {
            topic: "/SmartDashboard/Enabled".into(),
            value: TimestampedValue::new(Value::String("on".into()), 99),
        }));

        let descriptor = registry.describe("/SmartDashboard/Enabled").await.unwrap();
        assert_eq!(descriptor.kind, ValueKind::Boolean);
        assert_eq!(descriptor.publisher, "robot");
        assert_ne!(descriptor.last_change, Some(99));
    }

    #[tokio::test]
    async fn property_updates_merge_and_delete() {
        let (_server, _manager, registry) = connected().await;
        let topic = "/SmartDashboard/Battery Voltage";

        registry.apply(&event(TopicChange::PropertiesChanged {
            name: topic.into(),
            properties: json!({"persistent": true, "retained": true}),
        }));
        registry.apply(&event(TopicChange::PropertiesChanged {
            name: topic.into(),
            properties: json!({"retained": null, "cached": false}),
        }));

        let descriptor = registry.describe(topic).await.unwrap();
        assert_eq!(descriptor.properties, json!({"persistent": true, "cached": false}));
    }

    #[tokio::test]
    async fn lagging_consumer_rebuilds_from_snapshot() {
        let server = LoopbackServer::new();
        for i in 0..200 {
            server.publish(&format!("/AdvantageKit/T{i:05}"), Value::Integer(i)).unwrap();
        }
        server.announce(TopicInfo::new("/FMSInfo/MatchNumber", ValueKind::Integer, "fms"));

        let config = BridgeConfig { event_capacity: 16, ..BridgeConfig::default() };
        let manager = ConnectionManager::new(Arc::new(server.client()), Arc::new(config));
        let registry = TopicRegistry::spawn(Arc::clone(&manager));
        manager.connect(ConnectRequest::address("127.0.0.1", 5810)).await.unwrap();

        assert_eq!(registry.list(&TopicFilter::all()).await.len(), 201);
        let first = registry.describe("/AdvantageKit/T00000").await.unwrap();
        assert_eq!(first.kind, ValueKind::Integer);
        assert!(first.last_change.is_some());
        assert_eq!(registry.declared_kind("/FMSInfo/MatchNumber").await, Some(ValueKind::Integer));

        // Later events still apply on top of the rebuilt state
        server.unpublish("/AdvantageKit/T00001");
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.declared_kind("/AdvantageKit/T00001").await.is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.list(&TopicFilter::new("/AdvantageKit/")).await.len(), 199);
    }

    #[test]
    fn merge_ignores_non_objects() {
        let mut properties = json!({"a": 1});
        merge_properties(&mut properties, &json!([1, 2]));
        assert_eq!(properties, json!({"a": 1}));
    }
}
