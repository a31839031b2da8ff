//! Conversion between JSON tool arguments and NetworkTables values.
//!
//! Agents speak JSON; topics have a fixed declared kind. Two entry points cover
//! both directions of the boundary:
//!
//! - [`coerce`] converts a JSON value into the declared kind of a known topic.
//!   The only conversion performed is lossless numeric widening (an integer
//!   literal written to a `double` or `float` topic). Everything else that does
//!   not match is a [`BridgeError::TypeMismatch`].
//! - [`infer`] picks a kind for a topic that has never been announced. Values
//!   whose kind cannot be determined (null, objects, mixed or empty arrays) are
//!   rejected with [`BridgeError::InvalidArgument`].
//!
//! [`to_json`] converts back. Raw records travel as base64 strings; non-finite
//! floating point numbers become `null` because JSON cannot carry them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Number, Value as Json};

use super::{Value, ValueKind};
use crate::{BridgeError, Result};

/// Short name of a JSON value's shape for error messages.
pub fn json_kind_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Convert a value to its JSON representation.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => float_to_json(f64::from(*f)),
        Value::Double(d) => float_to_json(*d),
        Value::String(s) => Json::String(s.clone()),
        Value::Raw(bytes) => Json::String(BASE64.encode(bytes)),
        Value::BooleanArray(items) => Json::Array(items.iter().map(|b| Json::Bool(*b)).collect()),
        Value::IntegerArray(items) => Json::Array(items.iter().map(|i| Json::from(*i)).collect()),
        Value::FloatArray(items) => {
            Json::Array(items.iter().map(|f| float_to_json(f64::from(*f))).collect())
        }
        Value::DoubleArray(items) => Json::Array(items.iter().map(|d| float_to_json(*d)).collect()),
        Value::StringArray(items) => {
            Json::Array(items.iter().map(|s| Json::String(s.clone())).collect())
        }
    }
}

fn float_to_json(value: f64) -> Json {
    Number::from_f64(value).map(Json::Number).unwrap_or(Json::Null)
}

/// Convert JSON into a value of the topic's declared kind.
pub fn coerce(topic: &str, json: &Json, kind: ValueKind) -> Result<Value> {
    let mismatch = || BridgeError::type_mismatch(topic, kind, json_kind_name(json));

    let value = match kind {
        ValueKind::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
        ValueKind::Integer => Value::Integer(json.as_i64().ok_or_else(mismatch)?),
        ValueKind::Float => Value::Float(number(topic, json, kind, as_f32)?),
        ValueKind::Double => Value::Double(number(topic, json, kind, as_f64)?),
        ValueKind::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        ValueKind::Raw => Value::Raw(raw_bytes(json).ok_or_else(mismatch)?),
        ValueKind::BooleanArray => {
            Value::BooleanArray(elements(json, Json::as_bool).ok_or_else(mismatch)?)
        }
        ValueKind::IntegerArray => {
            Value::IntegerArray(elements(json, Json::as_i64).ok_or_else(mismatch)?)
        }
        ValueKind::FloatArray => Value::FloatArray(numbers(topic, json, kind, as_f32)?),
        ValueKind::DoubleArray => Value::DoubleArray(numbers(topic, json, kind, as_f64)?),
        ValueKind::StringArray => Value::StringArray(
            elements(json, |j| j.as_str().map(str::to_string)).ok_or_else(mismatch)?,
        ),
    };

    Ok(value)
}

/// Infer a value (and therefore a kind) for a topic with no declared kind.
pub fn infer(topic: &str, json: &Json) -> Result<Value> {
    let reject = |details: &str| {
        BridgeError::invalid_argument("value", format!("cannot infer a type for '{topic}': {details}"))
    };

    match json {
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None if n.is_u64() => Err(reject("integer exceeds the 64-bit signed range")),
            None => n.as_f64().map(Value::Double).ok_or_else(|| reject("unrepresentable number")),
        },
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => {
            let Some(first) = items.first() else {
                return Err(reject("empty arrays carry no element type"));
            };
            let kind = match first {
                Json::Bool(_) => ValueKind::BooleanArray,
                Json::String(_) => ValueKind::StringArray,
                Json::Number(_) if items.iter().all(|j| j.is_i64()) => ValueKind::IntegerArray,
                Json::Number(_) => ValueKind::DoubleArray,
                other => {
                    return Err(reject(&format!(
                        "arrays of {} are not supported",
                        json_kind_name(other)
                    )));
                }
            };
            coerce(topic, json, kind).map_err(|_| reject("array elements have mixed types"))
        }
        Json::Null => Err(reject("null has no type")),
        Json::Object(_) => Err(reject("objects are not supported; use a raw record")),
    }
}

/// Convert JSON to a value, using the declared kind when one is known.
pub fn from_json(topic: &str, json: &Json, declared: Option<ValueKind>) -> Result<Value> {
    match declared {
        Some(kind) => coerce(topic, json, kind),
        None => infer(topic, json),
    }
}

/// Outcome of converting one JSON literal to a floating point kind.
enum Narrowed<T> {
    Exact(T),
    /// A number the kind cannot hold without loss
    Lossy(&'static str),
    NotANumber,
}

fn integer<T>(value: T, exact: bool) -> Narrowed<T> {
    if exact { Narrowed::Exact(value) } else { Narrowed::Lossy("integer not exactly representable") }
}

fn as_f32(n: &Number) -> Narrowed<f32> {
    if let Some(i) = n.as_i64() {
        return integer(i as f32, i as f32 as i128 == i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return integer(u as f32, u as f32 as u128 == u128::from(u));
    }
    match n.as_f64().map(|d| d as f32) {
        Some(f) if f.is_finite() => Narrowed::Exact(f),
        Some(_) => Narrowed::Lossy("number outside the float range"),
        None => Narrowed::NotANumber,
    }
}

fn as_f64(n: &Number) -> Narrowed<f64> {
    if let Some(i) = n.as_i64() {
        return integer(i as f64, i as f64 as i128 == i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return integer(u as f64, u as f64 as u128 == u128::from(u));
    }
    n.as_f64().map_or(Narrowed::NotANumber, Narrowed::Exact)
}

/// Convert a number literal to a floating point kind, rejecting lossy conversions
fn number<T>(
    topic: &str,
    json: &Json,
    kind: ValueKind,
    convert: fn(&Number) -> Narrowed<T>,
) -> Result<T> {
    let narrowed = match json {
        Json::Number(n) => convert(n),
        _ => Narrowed::NotANumber,
    };
    match narrowed {
        Narrowed::Exact(value) => Ok(value),
        Narrowed::Lossy(reason) => {
            Err(BridgeError::type_mismatch(topic, kind, format!("{reason} ({json})")))
        }
        Narrowed::NotANumber => Err(BridgeError::type_mismatch(topic, kind, json_kind_name(json))),
    }
}

fn numbers<T>(
    topic: &str,
    json: &Json,
    kind: ValueKind,
    convert: fn(&Number) -> Narrowed<T>,
) -> Result<Vec<T>> {
    let Some(items) = json.as_array() else {
        return Err(BridgeError::type_mismatch(topic, kind, json_kind_name(json)));
    };
    items.iter().map(|item| number(topic, item, kind, convert)).collect()
}

fn elements<T>(json: &Json, convert: impl Fn(&Json) -> Option<T>) -> Option<Vec<T>> {
    json.as_array()?.iter().map(convert).collect()
}

fn raw_bytes(json: &Json) -> Option<Vec<u8>> {
    match json {
        Json::String(encoded) => BASE64.decode(encoded).ok(),
        Json::Array(items) => items
            .iter()
            .map(|j| j.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_literal_widens_to_double_topic() {
        let value = coerce("/drive/speed", &json!(3), ValueKind::Double).unwrap();
        assert_eq!(value, Value::Double(3.0));
    }

    #[test]
    fn float_rejects_out_of_range_numbers() {
        let err = coerce("/arm/angle", &json!(1e300), ValueKind::Float).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));

        let err = coerce("/arm/angles", &json!([1.5, -1e300]), ValueKind::FloatArray).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));

        assert_eq!(coerce("/arm/angle", &json!(0.25), ValueKind::Float).unwrap(), Value::Float(0.25));
    }

    #[test]
    fn integers_must_widen_exactly() {
        assert_eq!(
            coerce("/f", &json!(16_777_216), ValueKind::Float).unwrap(),
            Value::Float(16_777_216.0)
        );
        let err = coerce("/f", &json!(16_777_217), ValueKind::Float).unwrap_err();
        match err {
            BridgeError::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, "float");
                assert!(found.contains("16777217"), "{found}");
            }
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }

        assert!(coerce("/d", &json!(9_007_199_254_740_993_i64), ValueKind::Double).is_err());
        assert!(coerce("/d", &json!(u64::MAX), ValueKind::Double).is_err());
        assert_eq!(
            coerce("/d", &json!([1, 2]), ValueKind::DoubleArray).unwrap(),
            Value::DoubleArray(vec![1.0, 2.0])
        );
    }

    #[test]
    fn fractional_number_rejected_for_integer_topic() {
        let err = coerce("/count", &json!(2.5), ValueKind::Integer).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn string_rejected_for_boolean_topic() {
        let err = coerce("/enabled", &json!("string"), ValueKind::Boolean).unwrap_err();
        match err {
            BridgeError::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, "boolean");
                assert_eq!(found, "string");
            }
            other => panic!("Expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn raw_accepts_base64_and_byte_arrays() {
        let from_b64 = coerce("/pose", &json!("AQID"), ValueKind::Raw).unwrap();
        let from_array = coerce("/pose", &json!([1, 2, 3]), ValueKind::Raw).unwrap();
        assert_eq!(from_b64, Value::Raw(vec![1, 2, 3]));
        assert_eq!(from_array, from_b64);

        assert!(coerce("/pose", &json!([1, 256]), ValueKind::Raw).is_err());
    }

    #[test]
    fn empty_array_is_fine_for_declared_kind() {
        let value = coerce("/names", &json!([]), ValueKind::StringArray).unwrap();
        assert_eq!(value, Value::StringArray(vec![]));
    }

    #[test]
    fn infer_picks_array_kinds() {
        assert_eq!(infer("/a", &json!([true, false])).unwrap().kind(), ValueKind::BooleanArray);
        assert_eq!(infer("/a", &json!([1, 2])).unwrap().kind(), ValueKind::IntegerArray);
        assert_eq!(infer("/a", &json!([1, 2.5])).unwrap().kind(), ValueKind::DoubleArray);
        assert_eq!(infer("/a", &json!(["x"])).unwrap().kind(), ValueKind::StringArray);
    }

    #[test]
    fn infer_rejects_untyped_values() {
        for json in [json!(null), json!({"x": 1}), json!([]), json!([1, "x"]), json!([[1]])] {
            let err = infer("/a", &json).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "{json} should be rejected");
        }
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(to_json(&Value::Double(f64::NAN)), Json::Null);
        assert_eq!(to_json(&Value::DoubleArray(vec![1.0, f64::INFINITY])), json!([1.0, null]));
    }

    #[test]
    fn raw_serializes_as_base64() {
        assert_eq!(to_json(&Value::Raw(vec![1, 2, 3])), json!("AQID"));
    }
}
