//! NetworkTables value kinds and the tagged value type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a NetworkTables topic.
/// Maps to the NT4 type strings announced with every topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `boolean`
    Boolean,
    /// `int` (64-bit signed)
    Integer,
    /// `float` (32-bit)
    Float,
    /// `double` (64-bit)
    Double,
    /// `string` (also used for `json` topics)
    String,
    /// Opaque byte record: `raw`, `struct:*`, `proto:*`, `msgpack`, ...
    Raw,
    /// `boolean[]`
    BooleanArray,
    /// `int[]`
    IntegerArray,
    /// `float[]`
    FloatArray,
    /// `double[]`
    DoubleArray,
    /// `string[]`
    StringArray,
}

impl ValueKind {
    /// Canonical NT4 type string for this kind.
    pub const fn type_str(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "int",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Raw => "raw",
            ValueKind::BooleanArray => "boolean[]",
            ValueKind::IntegerArray => "int[]",
            ValueKind::FloatArray => "float[]",
            ValueKind::DoubleArray => "double[]",
            ValueKind::StringArray => "string[]",
        }
    }

    /// Resolve an announced type string.
    ///
    /// Structured records (`struct:Pose2d`, `proto:...`, `msgpack`, ...) are
    /// carried as raw bytes. Returns `None` for type strings this bridge does
    /// not understand; callers must reject those instead of guessing.
    pub fn from_type_str(type_str: &str) -> Option<Self> {
        let kind = match type_str {
            "boolean" => ValueKind::Boolean,
            "int" => ValueKind::Integer,
            "float" => ValueKind::Float,
            "double" => ValueKind::Double,
            "string" | "json" => ValueKind::String,
            "raw" | "rpc" | "msgpack" | "protobuf" | "structschema" => ValueKind::Raw,
            "boolean[]" => ValueKind::BooleanArray,
            "int[]" => ValueKind::IntegerArray,
            "float[]" => ValueKind::FloatArray,
            "double[]" => ValueKind::DoubleArray,
            "string[]" => ValueKind::StringArray,
            other if other.starts_with("struct:") || other.starts_with("proto:") => ValueKind::Raw,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether values of this kind are sequences.
    pub const fn is_array(&self) -> bool {
        matches!(
            self,
            ValueKind::BooleanArray
                | ValueKind::IntegerArray
                | ValueKind::FloatArray
                | ValueKind::DoubleArray
                | ValueKind::StringArray
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_str())
    }
}

/// Runtime value of a topic.
///
/// This is the transport-neutral representation handed to the tool layer.
/// Every coercion boundary matches on it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f32),
    Double(f64),
    String(String),
    Raw(Vec<u8>),
    BooleanArray(Vec<bool>),
    IntegerArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl Value {
    /// Kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Raw(_) => ValueKind::Raw,
            Value::BooleanArray(_) => ValueKind::BooleanArray,
            Value::IntegerArray(_) => ValueKind::IntegerArray,
            Value::FloatArray(_) => ValueKind::FloatArray,
            Value::DoubleArray(_) => ValueKind::DoubleArray,
            Value::StringArray(_) => ValueKind::StringArray,
        }
    }

    /// Element count for arrays, byte length for strings and raw records, 1 otherwise.
    pub fn size(&self) -> usize {
        match self {
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) | Value::Double(_) => 1,
            Value::String(s) => s.len(),
            Value::Raw(bytes) => bytes.len(),
            Value::BooleanArray(items) => items.len(),
            Value::IntegerArray(items) => items.len(),
            Value::FloatArray(items) => items.len(),
            Value::DoubleArray(items) => items.len(),
            Value::StringArray(items) => items.len(),
        }
    }

    /// Reject this value if it does not match the topic's declared kind.
    pub fn check_kind(&self, topic: &str, declared: ValueKind) -> crate::Result<()> {
        let found = self.kind();
        if found != declared {
            return Err(crate::BridgeError::type_mismatch(topic, declared, found));
        }
        Ok(())
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        super::coerce::to_json(self).serialize(serializer)
    }
}
