//! Dynamic property bag used for job parameters, worker capabilities, and
//! audit context.
//!
//! Heterogeneous values are represented as a small tagged enum rather than
//! `serde_json::Value` directly, so that ingestion can reject unknown kinds
//! up front (spec.md's "Dynamic property bags" design note) instead of
//! silently accepting arbitrary JSON shapes deep in the scheduler.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single value in a property bag.
///
/// Nesting is allowed one level deep via `Map`, which is sufficient for the
/// job parameter and worker capability shapes this crate persists; deeper
/// structures should be pushed into `serde_json::Value` at the repository
/// boundary instead of modeled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Map(_) => write!(f, "<map>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// A mapping from string keys to tagged values.
///
/// Used for job parameters, worker capabilities/tags, and audit context.
pub type Parameters = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrips_through_accessors() {
        let v: Value = "gpu".into();
        assert_eq!(v.as_str(), Some("gpu"));
        assert_eq!(v.as_i64(), None);
    }

    #[test]
    fn integer_coerces_to_float() {
        let v: Value = 5_i64.into();
        assert_eq!(v.as_f64(), Some(5.0));
    }

    #[test]
    fn display_renders_nested_map_as_placeholder() {
        let v = Value::Map(HashMap::new());
        assert_eq!(v.to_string(), "<map>");
    }
}
