//! Canonical document value shared by storage, the evaluator, and the shaper.
//!
//! Null is a first-class value meaning "absent". Floating NaN never survives
//! construction through [`Value::from`]; ordering treats any stray NaN as null.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

mod order;
pub mod path;

pub use order::{compare, ValueKey};

/// Mapping type used for documents.
pub type Object = BTreeMap<String, Value>;

/// Dynamically typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Seconds since the Unix epoch, fractional allowed.
    Timestamp(f64),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// String-keyed mapping, always in nested (not dotted) form.
    Object(Object),
}

impl Value {
    /// A value is missing iff it is null or the empty sequence.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Boolean coercion: missing, `false`, zero and `""` are false.
    pub fn truthy(&self) -> bool {
        match self {
            v if v.is_missing() => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) | Value::Timestamp(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric view of integers, floats and timestamps.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) | Value::Timestamp(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Mapping view.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// True for integers, floats and timestamps.
    pub fn is_number(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Float result that collapses NaN/infinite results to null.
    pub fn from_f64(value: f64) -> Value {
        if value.is_finite() {
            Value::Float(value)
        } else {
            Value::Null
        }
    }

    /// Iterates the value as a multiset: sequences yield their non-missing
    /// elements, missing yields nothing, anything else yields itself.
    pub fn members(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::Array(items) => Box::new(items.iter().filter(|v| !v.is_missing())),
            v if v.is_missing() => Box::new(std::iter::empty()),
            v => Box::new(std::iter::once(v)),
        }
    }

    /// Converts decoded JSON, normalising dotted keys into nested objects.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    n.as_f64().map(Value::from_f64).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut out = Value::Object(Object::new());
                for (key, value) in map {
                    let parts = path::split_field(&key);
                    let value = Value::from_json(value);
                    if parts.is_empty() {
                        merge_into(&mut out, value);
                    } else {
                        path::merge_path(&mut out, &parts, value);
                    }
                }
                out
            }
        }
    }

    /// Encodes as JSON. Timestamps become numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) | Value::Timestamp(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Null))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other).is_eq()
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(compare(self, other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) | Value::Timestamp(f) => {
                if f.is_finite() {
                    serializer.serialize_f64(*f)
                } else {
                    serializer.serialize_none()
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(None)?;
                for (key, value) in map.iter().filter(|(_, v)| !matches!(v, Value::Null)) {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Value::Null
        } else {
            Value::Float(value)
        }
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_truthiness() {
        assert!(Value::Null.is_missing());
        assert!(Value::Array(vec![]).is_missing());
        assert!(!Value::Int(0).is_missing());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("x").truthy());
        assert!(!Value::Array(vec![]).truthy());
        assert!(Value::Array(vec![Value::Null]).truthy());
    }

    #[test]
    fn dotted_keys_normalize_to_nested() {
        let flat = Value::from_json(json!({"a.b": 1, "a": {"c": 2}}));
        let nested = Value::from_json(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(flat, nested);
        assert_eq!(flat.to_json(), json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn escaped_dot_is_literal() {
        let value = Value::from_json(json!({"a\\.b": 1}));
        let map = value.as_object().expect("object");
        assert!(map.contains_key("a.b"));
    }

    #[test]
    fn nan_becomes_null() {
        assert!(matches!(Value::from(f64::NAN), Value::Null));
        assert!(Value::Float(f64::NAN).is_missing());
    }

    #[test]
    fn serializes_without_null_keys() {
        let value = Value::from_json(json!({"a": null, "b": [1, null]}));
        let text = serde_json::to_string(&value).expect("serialize");
        assert_eq!(text, r#"{"b":[1,null]}"#);
    }
}
