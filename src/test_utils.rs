//! Robot fixtures shared by unit tests and benchmarks
//!
//! The fixtures seed a [`LoopbackServer`] with a small dashboard that looks
//! like what a typical FRC robot publishes, so tests do not have to repeat
//! the same setup.

#![cfg(any(test, feature = "benchmark"))]

use serde_json::json;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::clients::LoopbackServer;
use crate::config::BridgeConfig;
use crate::connection::ConnectRequest;
use crate::types::Value;
use crate::Result;

pub const BATTERY_VOLTAGE: &str = "/SmartDashboard/Battery Voltage";
pub const ENABLED: &str = "/SmartDashboard/Enabled";
pub const MODULE_SPEEDS: &str = "/SmartDashboard/Module Speeds";
pub const AUTO_MODES: &str = "/Shuffleboard/Auto/Modes";
pub const MATCH_NUMBER: &str = "/FMSInfo/MatchNumber";
pub const ALLIANCE_COLOR: &str = "/FMSInfo/IsRedAlliance";

/// Address the loopback robot is reached at in fixtures.
pub fn robot_address() -> ConnectRequest {
    ConnectRequest::address("127.0.0.1", crate::config::DEFAULT_PORT)
}

/// Publish the standard dashboard on `server`.
pub fn seed_dashboard(server: &LoopbackServer) -> Result<()> {
    server.publish(BATTERY_VOLTAGE, Value::Double(12.6))?;
    server.publish(ENABLED, Value::Boolean(false))?;
    server.publish(MODULE_SPEEDS, Value::DoubleArray(vec![0.0, 0.0, 0.0, 0.0]))?;
    server.publish(
        AUTO_MODES,
        Value::StringArray(vec!["Left".into(), "Center".into(), "Right".into()]),
    )?;
    server.publish(MATCH_NUMBER, Value::Integer(42))?;
    server.publish(ALLIANCE_COLOR, Value::Boolean(true))?;
    server.set_properties(AUTO_MODES, json!({ "persistent": true }));
    Ok(())
}

/// Every topic [`seed_dashboard`] publishes, sorted by path.
pub fn dashboard_topics() -> Vec<String> {
    let mut topics: Vec<String> =
        [BATTERY_VOLTAGE, ENABLED, MODULE_SPEEDS, AUTO_MODES, MATCH_NUMBER, ALLIANCE_COLOR]
            .iter()
            .map(|topic| topic.to_string())
            .collect();
    topics.sort();
    topics
}

/// A bridge connected to a seeded loopback robot.
pub async fn connected_bridge(config: BridgeConfig) -> Result<(Bridge, Arc<LoopbackServer>)> {
    let (bridge, server) = Bridge::loopback(config)?;
    seed_dashboard(&server)?;
    bridge.connect(robot_address()).await?;
    Ok((bridge, server))
}
