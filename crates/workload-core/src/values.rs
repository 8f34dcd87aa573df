//! Concrete document values produced by expression evaluation.
//!
//! These are the already-evaluated values the engine hands to a backend
//! client. Backends convert them into their native encoding (BSON for
//! MongoDB); the engine itself never looks inside that encoding.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::fmt;

/// An ordered document: field order is preserved as written in the template.
pub type Document = IndexMap<String, Value>;

/// A concrete, fully evaluated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int32(i32),

    /// 64-bit signed integer
    Int64(i64),

    /// 64-bit floating point
    Double(f64),

    /// UTF-8 string
    String(String),

    /// Array of values
    Array(Vec<Value>),

    /// Nested document
    Document(Document),
}

impl Value {
    /// Build an integer value, narrowing to `Int32` when it fits.
    pub fn int(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(v) => Self::Int32(v),
            Err(_) => Self::Int64(value),
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as an i64 (both integer widths).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as an f64 (any numeric type).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(f64::from(*i)),
            Self::Int64(i) => Some(*i as f64),
            Self::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a document.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Consume this value, returning the document if it is one.
    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Document(_) => "document",
        }
    }

    /// Equality that treats numbers of different widths as comparable,
    /// the way a document store matches `{a: 1}` against an int64 field.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            (Self::Document(a), Self::Document(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.matches(other)))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }

    /// Rough encoded size in bytes, used for throughput metrics.
    ///
    /// Follows the BSON layout closely enough for reporting: fixed widths
    /// for scalars, length-prefixed strings, and per-field key overhead.
    pub fn approx_size(&self) -> u64 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int32(_) => 4,
            Self::Int64(_) | Self::Double(_) => 8,
            Self::String(s) => 4 + s.len() as u64 + 1,
            Self::Array(items) => {
                5 + items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| 2 + i.to_string().len() as u64 + v.approx_size())
                    .sum::<u64>()
            }
            Self::Document(doc) => document_size(doc),
        }
    }
}

/// Rough encoded size of a document in bytes.
pub fn document_size(doc: &Document) -> u64 {
    5 + doc
        .iter()
        .map(|(k, v)| 2 + k.len() as u64 + v.approx_size())
        .sum::<u64>()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Double(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Self::Document(d)
    }
}

/// Convert a YAML scalar, sequence or mapping into a literal `Value`.
///
/// Mapping keys must be strings (or scalars that print as strings); other
/// keys are dropped.
pub fn yaml_to_value(yaml: &YamlValue) -> Value {
    match yaml {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Double(f)
            } else {
                Value::String(n.to_string())
            }
        }
        YamlValue::String(s) => Value::String(s.clone()),
        YamlValue::Sequence(arr) => Value::Array(arr.iter().map(yaml_to_value).collect()),
        YamlValue::Mapping(map) => {
            let doc: Document = map
                .iter()
                .filter_map(|(k, v)| Some((yaml_key(k)?, yaml_to_value(v))))
                .collect();
            Value::Document(doc)
        }
        YamlValue::Tagged(tagged) => yaml_to_value(&tagged.value),
    }
}

/// Render a YAML mapping key as a document field name.
pub fn yaml_key(key: &YamlValue) -> Option<String> {
    match key {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build a [`Document`] from field/value pairs.
///
/// ```
/// use workload_core::{doc, Value};
/// let d = doc! { "a" => 1, "b" => "x" };
/// assert_eq!(d.get("a"), Some(&Value::Int32(1)));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Document::new();
        $( d.insert(($key).to_string(), $crate::Value::from($value)); )+
        d
    }};
}
