//! Core types for NetworkTables data representation.
//!
//! This module provides the foundational data structures shared by every
//! component of the bridge:
//!
//! - [`Value`] is the closed, tagged value type with one variant per NetworkTables kind
//! - [`ValueKind`] is a topic's declared kind and maps to NT4 type strings
//! - [`coerce`] converts between JSON tool arguments and [`Value`]
//! - [`TopicInfo`] / [`TopicDescriptor`] describe announced topics
//! - [`TopicFilter`] implements the prefix/glob rule used for discovery and subscriptions
//! - [`ConnectionState`] / [`ConnectionInfo`] describe connection health
//!
//! ## Usage Example
//!
//! ```rust
//! use ntbridge::types::{coerce, Value, ValueKind};
//! use serde_json::json;
//!
//! // An integer literal written to a double topic widens losslessly
//! let value = coerce::coerce("/SmartDashboard/Speed", &json!(3), ValueKind::Double).unwrap();
//! assert_eq!(value, Value::Double(3.0));
//!
//! // A string written to a boolean topic is a contract violation
//! assert!(coerce::coerce("/SmartDashboard/Enabled", &json!("yes"), ValueKind::Boolean).is_err());
//! ```

pub mod coerce;
mod connection;
mod topic;
mod value;

pub use connection::{
    ConnectionInfo, ConnectionState, RemotePeer, ServerAddress, TimeSyncInfo,
};
pub use topic::{TimestampedValue, TopicDescriptor, TopicFilter, TopicInfo};
pub use value::{Value, ValueKind};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value as Json;

    const ALL_KINDS: [ValueKind; 11] = [
        ValueKind::Boolean,
        ValueKind::Integer,
        ValueKind::Float,
        ValueKind::Double,
        ValueKind::String,
        ValueKind::Raw,
        ValueKind::BooleanArray,
        ValueKind::IntegerArray,
        ValueKind::FloatArray,
        ValueKind::DoubleArray,
        ValueKind::StringArray,
    ];

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e6f64..1.0e6).prop_map(Value::Double),
            "[ -~]{0,16}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Raw),
            prop::collection::vec(any::<bool>(), 0..8).prop_map(Value::BooleanArray),
            prop::collection::vec(any::<i64>(), 0..8).prop_map(Value::IntegerArray),
            prop::collection::vec(-1.0e6f64..1.0e6, 0..8).prop_map(Value::DoubleArray),
            prop::collection::vec("[a-z]{0,8}", 0..8).prop_map(Value::StringArray),
        ]
    }

    proptest! {
        #[test]
        fn prop_type_strings_resolve_to_their_kind(kind in prop::sample::select(ALL_KINDS.to_vec())) {
            prop_assert_eq!(ValueKind::from_type_str(kind.type_str()), Some(kind));
            prop_assert_eq!(kind.to_string(), kind.type_str());
        }

        #[test]
        fn prop_json_of_declared_kind_coerces_back(value in arb_value()) {
            // Whatever the bridge hands out for a topic must be accepted when written back
            let json = coerce::to_json(&value);
            let back = coerce::coerce("/prop", &json, value.kind());
            prop_assert_eq!(back.ok(), Some(value));
        }

        #[test]
        fn prop_scalar_kinds_never_cross(value in arb_value()) {
            let json = coerce::to_json(&value);

            let as_boolean = coerce::coerce("/prop", &json, ValueKind::Boolean);
            prop_assert_eq!(as_boolean.is_ok(), value.kind() == ValueKind::Boolean);

            let as_integer = coerce::coerce("/prop", &json, ValueKind::Integer);
            prop_assert_eq!(as_integer.is_ok(), value.kind() == ValueKind::Integer);
        }

        #[test]
        fn prop_size_matches_json_array_length(value in arb_value()) {
            if let Json::Array(items) = coerce::to_json(&value) {
                prop_assert_eq!(items.len(), value.size());
            }
        }
    }

    #[test]
    fn unknown_type_strings_are_rejected() {
        assert_eq!(ValueKind::from_type_str("struct:Pose2d"), Some(ValueKind::Raw));
        assert_eq!(ValueKind::from_type_str("json"), Some(ValueKind::String));
        assert_eq!(ValueKind::from_type_str("quaternion"), None);
        assert_eq!(ValueKind::from_type_str(""), None);
    }

    #[test]
    fn check_kind_reports_both_sides() {
        let err = Value::String("on".into()).check_kind("/enabled", ValueKind::Boolean).unwrap_err();
        assert_eq!(err.to_string(), "Type mismatch on '/enabled': declared boolean, got string");
    }
}
