//! JSON dispatch for tool calls
//!
//! [`Bridge::call`] takes a tool name and its JSON arguments and returns the
//! JSON tool result. Errors are returned as [`BridgeError`] so the protocol
//! layer can render them with [`BridgeError::code`] and
//! [`BridgeError::recovery_suggestions`].
//!
//! Topic arguments may arrive percent-encoded and are decoded before use.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::connection::ConnectRequest;
use crate::resources::decode_topic;
use crate::{BridgeError, Result};

/// Name and description of one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "nt_connect",
        description: "Connect to a NetworkTables server by team number or address",
    },
    ToolSpec { name: "nt_disconnect", description: "Disconnect from the NetworkTables server" },
    ToolSpec {
        name: "nt_connection_info",
        description: "Get connection state, latency and generation",
    },
    ToolSpec { name: "nt_time_sync_info", description: "Get NetworkTables time sync information" },
    ToolSpec { name: "nt_get", description: "Get the value of a NetworkTables topic" },
    ToolSpec { name: "nt_get_multiple", description: "Get values of multiple NetworkTables topics" },
    ToolSpec { name: "nt_set", description: "Set the value of a NetworkTables topic" },
    ToolSpec {
        name: "nt_set_array",
        description: "Set an array topic from a JSON-encoded array string",
    },
    ToolSpec { name: "nt_set_multiple", description: "Set values of multiple NetworkTables topics" },
    ToolSpec { name: "nt_list_topics", description: "List available NetworkTables topics" },
    ToolSpec { name: "nt_get_info", description: "Get detailed information about a topic" },
    ToolSpec {
        name: "nt_subscribe",
        description: "Sample topics for a bounded duration and return the changes",
    },
    ToolSpec { name: "nt_configure_cache", description: "Change the read cache TTL in seconds" },
];

/// Every tool the bridge answers to.
pub fn tool_catalog() -> &'static [ToolSpec] {
    TOOLS
}

fn default_true() -> bool {
    true
}

fn default_duration() -> f64 {
    10.0
}

#[derive(Debug, Deserialize)]
struct TopicArgs {
    topic: String,
    #[serde(default = "default_true")]
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct TopicsArgs {
    topics: Vec<String>,
    #[serde(default = "default_true")]
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct SetArgs {
    topic: String,
    value: Json,
}

#[derive(Debug, Deserialize)]
struct SetMultipleArgs {
    updates: Map<String, Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListArgs {
    #[serde(alias = "topic_prefix")]
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeArgs {
    #[serde(default)]
    topics: Vec<String>,
    /// Every entry is a prefix, with or without a trailing `/`
    #[serde(default)]
    topic_prefixes: Vec<String>,
    #[serde(default = "default_duration")]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct CacheArgs {
    ttl: f64,
}

fn parse<T: DeserializeOwned>(args: Json) -> Result<T> {
    // Tools without parameters may be called with `null`
    let args = if args.is_null() { Json::Object(Map::new()) } else { args };
    Ok(serde_json::from_value(args)?)
}

fn decode_all(topics: &[String]) -> Result<Vec<String>> {
    topics.iter().map(|topic| decode_topic(topic)).collect()
}

fn to_json<T: Serialize>(value: &T) -> Result<Json> {
    serde_json::to_value(value)
        .map_err(|e| BridgeError::invalid_argument("result", format!("not representable as JSON: {e}")))
}

impl Bridge {
    /// Dispatch one tool call
    pub async fn call(&self, name: &str, args: Json) -> Result<Json> {
        debug!(tool = name, "Tool call");
        let result = self.dispatch(name, args).await;
        if let Err(e) = &result {
            warn!(tool = name, code = e.code(), error = %e, "Tool call failed");
        }
        result
    }

    async fn dispatch(&self, name: &str, args: Json) -> Result<Json> {
        match name {
            "nt_connect" => {
                let request: ConnectRequest = parse(args)?;
                let info = self.connect(request).await?;
                Ok(json!({ "success": true, "connection_info": info }))
            }
            "nt_disconnect" => {
                self.disconnect().await;
                Ok(json!({ "success": true }))
            }
            "nt_connection_info" => to_json(&self.connection_info()),
            "nt_time_sync_info" => to_json(&self.time_sync_info()),
            "nt_get" => {
                let args: TopicArgs = parse(args)?;
                let reading = self.get(&decode_topic(&args.topic)?, args.use_cache).await?;
                to_json(&reading)
            }
            "nt_get_multiple" => {
                let args: TopicsArgs = parse(args)?;
                let results = self.get_multiple(&decode_all(&args.topics)?, args.use_cache).await;
                Ok(json!({ "results": results }))
            }
            "nt_set" => {
                let args: SetArgs = parse(args)?;
                let topic = decode_topic(&args.topic)?;
                self.set(&topic, &args.value).await?;
                Ok(json!({ "success": true, "topic": topic }))
            }
            "nt_set_array" => {
                let args: SetArgs = parse(args)?;
                let topic = decode_topic(&args.topic)?;
                match &args.value {
                    Json::String(encoded) => self.set_array(&topic, encoded).await?,
                    Json::Array(_) => self.set(&topic, &args.value).await?,
                    other => {
                        return Err(BridgeError::invalid_argument(
                            "value",
                            format!("expected a JSON array or encoded array string, got {other}"),
                        ));
                    }
                }
                Ok(json!({ "success": true, "topic": topic }))
            }
            "nt_set_multiple" => {
                let args: SetMultipleArgs = parse(args)?;
                let updates = args
                    .updates
                    .into_iter()
                    .map(|(topic, value)| Ok((decode_topic(&topic)?, value)))
                    .collect::<Result<Vec<_>>>()?;
                let results = self.set_multiple(&updates).await;
                Ok(json!({ "results": results }))
            }
            "nt_list_topics" => {
                let args: ListArgs = parse(args)?;
                let prefix = args.prefix.as_deref().map(decode_topic).transpose()?;
                let topics = self.list_topics(prefix.as_deref()).await;
                Ok(json!({ "count": topics.len(), "topics": topics }))
            }
            "nt_get_info" => {
                let args: TopicArgs = parse(args)?;
                to_json(&self.get_info(&decode_topic(&args.topic)?).await?)
            }
            "nt_subscribe" => {
                let args: SubscribeArgs = parse(args)?;
                let topics = decode_all(&args.topics)?;
                let prefixes = decode_all(&args.topic_prefixes)?;
                let result = self.subscribe_with_prefixes(&topics, &prefixes, args.duration).await?;
                to_json(&result)
            }
            "nt_configure_cache" => {
                let args: CacheArgs = parse(args)?;
                let ttl = Duration::try_from_secs_f64(args.ttl).map_err(|e| {
                    BridgeError::invalid_argument("ttl", format!("{} is not a valid TTL: {e}", args.ttl))
                })?;
                self.configure_cache(ttl);
                Ok(json!({ "success": true, "ttl_secs": ttl.as_secs_f64() }))
            }
            unknown => Err(BridgeError::invalid_argument("name", format!("unknown tool '{unknown}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::types::Value;

    #[test]
    fn catalog_names_are_unique_and_prefixed() {
        let mut names: Vec<_> = tool_catalog().iter().map(|tool| tool.name).collect();
        assert!(names.iter().all(|name| name.starts_with("nt_")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tool_catalog().len());
    }

    #[tokio::test]
    async fn every_catalogued_tool_is_dispatched() {
        let (bridge, _server) = Bridge::loopback(BridgeConfig::default()).unwrap();
        for tool in tool_catalog() {
            if let Err(e) = bridge.call(tool.name, json!({ "bogus": [] })).await {
                assert!(!e.to_string().contains("unknown tool"), "{} not dispatched", tool.name);
            }
        }
        assert!(bridge.call("nt_teleport", Json::Null).await.is_err());
    }

    #[tokio::test]
    async fn connect_get_set_roundtrip() {
        let (bridge, server) = Bridge::loopback(BridgeConfig::default()).unwrap();
        server.publish("/SmartDashboard/Auto Selector", Value::String("Left".into())).unwrap();

        let connected = bridge
            .call("nt_connect", json!({ "server_ip": "127.0.0.1", "identity": "strategy-agent" }))
            .await
            .unwrap();
        assert_eq!(connected["connection_info"]["state"], "connected");

        bridge
            .call("nt_set", json!({ "topic": "/SmartDashboard/Auto%20Selector", "value": "Center" }))
            .await
            .unwrap();
        let got = bridge.call("nt_get", json!({ "topic": "/SmartDashboard/Auto Selector" })).await.unwrap();
        assert_eq!(got["value"], "Center");
        assert_eq!(got["from_cache"], false);
    }

    #[tokio::test]
    async fn malformed_arguments_are_invalid() {
        let (bridge, _server) = Bridge::loopback(BridgeConfig::default()).unwrap();

        let err = bridge.call("nt_get", json!({ "topics": "/x" })).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let err = bridge.call("nt_configure_cache", json!({ "ttl": -1.0 })).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test]
    async fn configure_cache_updates_ttl() {
        let (bridge, _server) = Bridge::loopback(BridgeConfig::default()).unwrap();
        let result = bridge.call("nt_configure_cache", json!({ "ttl": 0.25 })).await.unwrap();
        assert_eq!(result["ttl_secs"], 0.25);
        assert_eq!(bridge.cache_ttl(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn argument_aliases_are_accepted() {
        let (bridge, _server) = crate::test_utils::connected_bridge(BridgeConfig::default()).await.unwrap();

        let listed = bridge.call("nt_list_topics", json!({ "topic_prefix": "/FMSInfo/" })).await.unwrap();
        assert_eq!(listed["count"], 2);
        assert_eq!(listed["topics"][0]["name"], crate::test_utils::ALLIANCE_COLOR);

        let multiple = bridge
            .call("nt_get_multiple", json!({ "topics": [crate::test_utils::MATCH_NUMBER, "/missing"] }))
            .await
            .unwrap();
        assert_eq!(multiple["results"][0]["value"]["value"], 42);
        assert_eq!(multiple["results"][1]["error"]["code"], "unknown_topic");
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_prefixes_match_whole_subtrees() {
        let (bridge, _server) = crate::test_utils::connected_bridge(BridgeConfig::default()).await.unwrap();

        let reply = bridge
            .call("nt_subscribe", json!({ "topic_prefixes": ["/SmartDashboard"], "duration": 0.5 }))
            .await
            .unwrap();
        let topics: Vec<&str> = reply["topics"].as_array().unwrap().iter().filter_map(Json::as_str).collect();
        assert!(topics.contains(&crate::test_utils::BATTERY_VOLTAGE), "{topics:?}");
        assert!(topics.iter().all(|t| t.starts_with("/SmartDashboard")));

        // Without the prefix argument the same entry names one exact path
        let exact = bridge
            .call("nt_subscribe", json!({ "topics": ["/SmartDashboard"], "duration": 0.5 }))
            .await
            .unwrap();
        assert_eq!(exact["topics"], json!([]));

        let err = bridge.call("nt_subscribe", json!({ "duration": 0.5 })).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test]
    async fn parameterless_tools_accept_null() {
        let (bridge, _server) = Bridge::loopback(BridgeConfig::default()).unwrap();
        let info = bridge.call("nt_connection_info", Json::Null).await.unwrap();
        assert_eq!(info["state"], "disconnected");
        let listed = bridge.call("nt_list_topics", Json::Null).await.unwrap();
        assert_eq!(listed["count"], 0);
    }
}
