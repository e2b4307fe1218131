//! Rust-side mirror of JavaScript values captured out of the interpreter.
//!
//! The interpreter never hands live objects to the host. Values cross the
//! boundary as *tagged JSON* produced by the capture script in
//! [`crate::harness`]: plain JSON for `null`, booleans, finite numbers and
//! strings, and `{"$t": ...}` envelopes for everything else. Because every
//! array and object is wrapped, a player object that happens to contain a
//! `$t` key cannot be confused with an envelope.

use crate::errors::{Result, SandboxError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Function { name: String },
    /// Something the host cannot mirror: symbols, bigints, circular
    /// back-references, or values nested deeper than the capture depth.
    Opaque(String),
}

impl Value {
    /// Decode the tagged JSON emitted by the capture script.
    pub fn from_tagged(raw: serde_json::Value) -> Result<Value> {
        use serde_json::Value as Json;

        match raw {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| SandboxError::Capture(format!("unrepresentable number {}", n))),
            Json::String(s) => Ok(Value::String(s)),
            Json::Array(_) => Err(SandboxError::Capture(
                "bare array in tagged value".to_string(),
            )),
            Json::Object(mut map) => {
                let tag = map
                    .remove("$t")
                    .and_then(|t| t.as_str().map(str::to_string))
                    .ok_or_else(|| SandboxError::Capture("missing $t tag".to_string()))?;
                match tag.as_str() {
                    "undefined" => Ok(Value::Undefined),
                    "number" => {
                        let repr = take_str(&mut map, "repr")?;
                        let n = match repr.as_str() {
                            "NaN" => f64::NAN,
                            "Infinity" => f64::INFINITY,
                            "-Infinity" => f64::NEG_INFINITY,
                            other => {
                                return Err(SandboxError::Capture(format!(
                                    "unknown number repr {}",
                                    other
                                )))
                            }
                        };
                        Ok(Value::Number(n))
                    }
                    "function" => Ok(Value::Function {
                        name: take_str(&mut map, "name")?,
                    }),
                    "opaque" => Ok(Value::Opaque(take_str(&mut map, "repr")?)),
                    "array" => match map.remove("items") {
                        Some(Json::Array(items)) => items
                            .into_iter()
                            .map(Value::from_tagged)
                            .collect::<Result<Vec<_>>>()
                            .map(Value::Array),
                        _ => Err(SandboxError::Capture("array without items".to_string())),
                    },
                    "object" => match map.remove("entries") {
                        Some(Json::Object(entries)) => {
                            let mut out = BTreeMap::new();
                            for (k, v) in entries {
                                out.insert(k, Value::from_tagged(v)?);
                            }
                            Ok(Value::Object(out))
                        }
                        _ => Err(SandboxError::Capture("object without entries".to_string())),
                    },
                    other => Err(SandboxError::Capture(format!("unknown tag {}", other))),
                }
            }
        }
    }

    /// Structural equality with JavaScript test semantics.
    ///
    /// Primitives compare like `===` (so `NaN` never equals itself), arrays
    /// element-wise in order, objects by symmetric key set plus recursive
    /// value equality. `null` and `undefined` are distinct.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.deep_eq(w)).unwrap_or(false))
            }
            (Value::Function { name: a }, Value::Function { name: b }) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function { .. })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Plain JSON for the editor. Lossy: `undefined` and non-finite numbers
    /// become `null`, functions and opaque values become descriptive strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Function { name } => Json::String(format!("[Function {}]", name)),
            Value::Opaque(repr) => Json::String(repr.clone()),
        }
    }

    /// A JSON-like rendering for diagnostics, keeping `undefined` visible.
    pub fn inspect(&self) -> String {
        match self {
            Value::String(s) => format!("{:?}", s),
            Value::Array(items) => format!(
                "[{}]",
                items.iter().map(Value::inspect).collect::<Vec<_>>().join(", ")
            ),
            Value::Object(map) => format!(
                "{{{}}}",
                map.iter()
                    .map(|(k, v)| format!("{}: {}", k, v.inspect()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            other => other.to_string(),
        }
    }
}

fn take_str(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String> {
    match map.remove(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        _ => Err(SandboxError::Capture(format!("missing string field {}", key))),
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let repr = if n > 0.0 { "Infinity" } else { "-Infinity" };
        repr.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

/// Renders like JavaScript's `String(value)`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function { name } => write!(f, "function {}() {{ ... }}", name),
            Value::Opaque(repr) => write!(f, "{}", repr),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_envelopes() {
        let raw = json!({
            "$t": "object",
            "entries": {
                "items": { "$t": "array", "items": [1, "two", { "$t": "undefined" }] },
                "fn": { "$t": "function", "name": "routePower" },
                "nan": { "$t": "number", "repr": "NaN" }
            }
        });
        let value = Value::from_tagged(raw).unwrap();
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(
            map["items"],
            Value::Array(vec![
                Value::Number(1.0),
                Value::String("two".into()),
                Value::Undefined
            ])
        );
        assert!(map["fn"].is_function());
        assert!(map["nan"].as_f64().unwrap().is_nan());
    }

    #[test]
    fn rejects_untagged_containers() {
        assert!(Value::from_tagged(json!([1, 2])).is_err());
        assert!(Value::from_tagged(json!({ "a": 1 })).is_err());
    }

    #[test]
    fn arrays_are_order_sensitive() {
        let a = Value::from(json!([1, 2]));
        let b = Value::from(json!([2, 1]));
        assert!(!a.deep_eq(&b));
        assert!(a.deep_eq(&Value::from(json!([1, 2]))));
    }

    #[test]
    fn objects_compare_by_key_set_and_values() {
        let a = Value::from(json!({ "x": 1, "y": [true] }));
        assert!(a.deep_eq(&Value::from(json!({ "y": [true], "x": 1 }))));
        assert!(!a.deep_eq(&Value::from(json!({ "x": 1 }))));
        assert!(!a.deep_eq(&Value::from(json!({ "x": 1, "y": [true], "z": 0 }))));
    }

    #[test]
    fn null_is_not_undefined() {
        assert!(!Value::Null.deep_eq(&Value::Undefined));
        assert!(Value::Undefined.deep_eq(&Value::Undefined));
        assert!(!Value::Null.deep_eq(&Value::Object(BTreeMap::new())));
    }

    #[test]
    fn strict_primitive_equality() {
        assert!(!Value::Number(f64::NAN).deep_eq(&Value::Number(f64::NAN)));
        assert!(!Value::from("30").deep_eq(&Value::from(30i64)));
        assert!(Value::Number(30.0).deep_eq(&Value::from(json!(30))));
    }

    #[test]
    fn displays_like_js_string() {
        assert_eq!(Value::Number(30.0).to_string(), "30");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::from(json!([3, 4, null])).to_string(), "3,4,");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::from(json!([1, "a"])).inspect(), "[1, \"a\"]");
    }
}
