use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// A fully resolved argument value: variables have been substituted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<NormalizedValue>),
    Object(IndexMap<String, NormalizedValue>),
}

impl NormalizedValue {
    /// Converts a JSON value. Strings stay strings: callers that know the input type is an enum
    /// use [`NormalizedValue::into_enum`].
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => NormalizedValue::Null,
            Value::Bool(b) => NormalizedValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => NormalizedValue::Int(i),
                None => NormalizedValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => NormalizedValue::String(s.as_str().to_string()),
            Value::Array(items) => {
                NormalizedValue::List(items.iter().map(NormalizedValue::from_json).collect())
            }
            Value::Object(object) => NormalizedValue::Object(
                object
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), NormalizedValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            NormalizedValue::Null => Value::Null,
            NormalizedValue::Boolean(b) => Value::Bool(*b),
            NormalizedValue::Int(i) => Value::from(*i),
            NormalizedValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            NormalizedValue::String(s) | NormalizedValue::Enum(s) => {
                Value::String(ByteString::from(s.as_str()))
            }
            NormalizedValue::List(items) => {
                Value::Array(items.iter().map(NormalizedValue::to_json).collect())
            }
            NormalizedValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (ByteString::from(k.as_str()), v.to_json()))
                    .collect::<Object>(),
            ),
        }
    }

    /// Turns strings (and lists of strings) into enum values.
    pub fn into_enum(self) -> Self {
        match self {
            NormalizedValue::String(s) => NormalizedValue::Enum(s),
            NormalizedValue::List(items) => {
                NormalizedValue::List(items.into_iter().map(NormalizedValue::into_enum).collect())
            }
            other => other,
        }
    }
}

/// Prints the value as a GraphQL literal.
impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Null => f.write_str("null"),
            NormalizedValue::Boolean(b) => write!(f, "{b}"),
            NormalizedValue::Int(i) => write!(f, "{i}"),
            NormalizedValue::Float(v) => write!(f, "{v:?}"),
            NormalizedValue::String(s) => {
                // JSON string escaping is a valid GraphQL string literal
                let escaped = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                f.write_str(&escaped)
            }
            NormalizedValue::Enum(s) => f.write_str(s),
            NormalizedValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            NormalizedValue::Object(fields) => {
                f.write_str("{")?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}
