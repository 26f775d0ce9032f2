//! Provider-specific metadata values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Typed key-value bag attached to nodes and stats, also used for free-form
/// provider configuration.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A metadata value.
///
/// Untagged on the wire, so it reads naturally from TOML and JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::String(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::String(v)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self {
        MetaValue::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(MetaValue::from("x").as_str(), Some("x"));
        assert_eq!(MetaValue::from(true).as_bool(), Some(true));
        assert_eq!(MetaValue::from(7_i64).as_int(), Some(7));
        assert_eq!(MetaValue::from(7_i64).as_float(), Some(7.0));
        assert_eq!(MetaValue::from("x").as_int(), None);
        assert_eq!(MetaValue::from(vec!["a", "b"]).as_list().map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_untagged_json() {
        let meta: Metadata = serde_json::from_str(
            r#"{"channel": "general", "unread": 3, "muted": false, "tags": ["a", "b"]}"#,
        )
        .unwrap();
        assert_eq!(meta["channel"], MetaValue::from("general"));
        assert_eq!(meta["unread"], MetaValue::Int(3));
        assert_eq!(meta["muted"], MetaValue::Bool(false));
        assert_eq!(meta["tags"], MetaValue::from(vec!["a", "b"]));
    }
}
