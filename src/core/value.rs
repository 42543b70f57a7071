use serde::{Deserialize, Serialize};
use std::fmt;

/// A record key: either a primary key or a secondary index value.
///
/// Integers order before text, so auto-assigned ids and string ids never
/// interleave inside one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Integer(i64),
    Text(String),
}

impl Key {
    /// Extracts a key from a JSON value. Floats with a fractional part,
    /// booleans, nulls, arrays and objects are not valid keys.
    pub fn from_json(value: &serde_json::Value) -> Option<Key> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Key::Integer),
            serde_json::Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Reads `key_path` out of a record object.
    pub fn at_path(record: &serde_json::Value, key_path: &str) -> Option<Key> {
        record.get(key_path).and_then(Key::from_json)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Key::Integer(i) => serde_json::Value::from(*i),
            Key::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Key::Integer(i) => Some(*i),
            Key::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            Key::Integer(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "INTEGER",
            Self::Text(_) => "TEXT",
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "'{}'", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integers_order_before_text() {
        let mut keys = vec![Key::from("a"), Key::from(10i64), Key::from(2i64), Key::from("B")];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from(2i64), Key::from(10i64), Key::from("B"), Key::from("a")]
        );
    }

    #[test]
    fn test_from_json_rejects_non_key_values() {
        assert_eq!(Key::from_json(&json!(7)), Some(Key::Integer(7)));
        assert_eq!(Key::from_json(&json!("doc")), Some(Key::from("doc")));
        assert_eq!(Key::from_json(&json!(1.5)), None);
        assert_eq!(Key::from_json(&json!(null)), None);
        assert_eq!(Key::from_json(&json!([1])), None);
    }

    #[test]
    fn test_at_path() {
        let record = json!({ "documentId": "alice", "positionIndex": 3 });
        assert_eq!(Key::at_path(&record, "documentId"), Some(Key::from("alice")));
        assert_eq!(Key::at_path(&record, "missing"), None);
    }
}
