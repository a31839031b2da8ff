//! Single and multi-topic get/set
//!
//! Batches run every entry concurrently and report one outcome per entry in
//! input order. Writes are best effort: each entry is type-checked against the
//! topic's declared kind before it is sent, and a failure in one entry never
//! rolls back another.

use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::ReadCache;
use crate::connection::ConnectionManager;
use crate::registry::TopicRegistry;
use crate::types::{Value, ValueKind, coerce};
use crate::{BridgeError, Result};

/// A topic value as returned by `get`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub topic: String,
    pub kind: ValueKind,
    #[serde(rename = "type")]
    pub type_str: String,
    pub value: Value,
    /// Last change in microseconds of server time
    pub last_change: u64,
    /// Element count for arrays, byte count for strings and raw records
    pub size: usize,
    pub from_cache: bool,
}

/// Outcome of one batch entry.
#[derive(Debug, Clone)]
pub struct TopicOutcome<T> {
    pub topic: String,
    pub result: Result<T>,
}

impl<T> TopicOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl<T: Serialize> Serialize for TopicOutcome<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("topic", &self.topic)?;
        match &self.result {
            Ok(value) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("value", value)?;
            }
            Err(error) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

/// Coordinates reads and writes on behalf of the tool surface
#[derive(Debug)]
pub struct BatchCoordinator {
    manager: Arc<ConnectionManager>,
    cache: Arc<ReadCache>,
    registry: Arc<TopicRegistry>,
}

impl BatchCoordinator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        cache: Arc<ReadCache>,
        registry: Arc<TopicRegistry>,
    ) -> Self {
        Self { manager, cache, registry }
    }

    /// Read one topic, through the cache unless `use_cache` is false
    pub async fn get(&self, topic: &str, use_cache: bool) -> Result<Reading> {
        let read = self.cache.read(topic, !use_cache).await?;
        let value = read.value.value;

        let (kind, type_str) = match self.registry.describe(topic).await {
            Ok(descriptor) => (descriptor.kind, descriptor.type_str),
            Err(_) => (value.kind(), value.kind().type_str().to_string()),
        };
        self.registry.mark_read(topic);

        Ok(Reading {
            topic: topic.to_string(),
            kind,
            type_str,
            size: value.size(),
            value,
            last_change: read.value.last_change,
            from_cache: read.from_cache,
        })
    }

    /// Write a typed value
    ///
    /// The value must match the topic's declared kind when the topic is
    /// known. The topic's own cache entry is invalidated once the write is
    /// sent, so the next read observes it.
    pub async fn set(&self, topic: &str, value: Value) -> Result<()> {
        self.manager.ensure_connected()?;
        if let Some(declared) = self.registry.declared_kind(topic).await {
            value.check_kind(topic, declared)?;
        }

        self.manager.publish(topic, &value).await?;
        self.cache.invalidate(topic);
        Ok(())
    }

    /// Write a JSON value, coerced to the topic's declared kind
    pub async fn set_json(&self, topic: &str, json: &Json) -> Result<()> {
        self.manager.ensure_connected()?;
        let declared = self.registry.declared_kind(topic).await;
        let value = coerce::from_json(topic, json, declared)?;
        self.set(topic, value).await
    }

    /// Write an array given as a JSON-encoded string
    pub async fn set_array_json(&self, topic: &str, encoded: &str) -> Result<()> {
        let json: Json = serde_json::from_str(encoded).map_err(|e| {
            BridgeError::invalid_argument("value", format!("not valid JSON: {e}"))
        })?;
        if !json.is_array() {
            return Err(BridgeError::invalid_argument(
                "value",
                format!("expected a JSON array, got {}", coerce::json_kind_name(&json)),
            ));
        }
        self.set_json(topic, &json).await
    }

    /// Read many topics concurrently; outcomes are in input order
    pub async fn get_multiple(&self, topics: &[String], use_cache: bool) -> Vec<TopicOutcome<Reading>> {
        let results = futures::future::join_all(topics.iter().map(|topic| self.get(topic, use_cache))).await;
        let outcomes: Vec<_> = topics
            .iter()
            .zip(results)
            .map(|(topic, result)| TopicOutcome { topic: topic.clone(), result })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        debug!(requested = topics.len(), failed, "Batch get finished");
        outcomes
    }

    /// Write many topics concurrently; outcomes are in input order
    pub async fn set_multiple(&self, updates: &[(String, Json)]) -> Vec<TopicOutcome<()>> {
        let results = futures::future::join_all(
            updates.iter().map(|(topic, json)| self.set_json(topic, json)),
        )
        .await;
        let outcomes: Vec<_> = updates
            .iter()
            .zip(results)
            .map(|((topic, _), result)| TopicOutcome { topic: topic.clone(), result })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(requested = updates.len(), failed, "Batch set finished");
        outcomes
    }
}
