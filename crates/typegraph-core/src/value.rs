//! Property value model and canonical encodings.
//!
//! Node and edge properties travel as JSON bags (`serde_json::Map`); this
//! module provides the typed view over them, the canonical string encoding
//! used for uniqueness keys, and the timestamp normalisation applied at the
//! adapter edge (ISO-8601 / RFC 3339, UTC).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::GraphError;

/// A property bag as stored in the `props` column.
pub type Props = serde_json::Map<String, JsonValue>;

/// Reserved marker standing in for a null component of a uniqueness key.
/// U+0000 cannot appear in JSON string content produced by the validator.
pub const UNIQUE_NULL_MARKER: &str = "\u{0}";

/// Separator between components of a uniqueness key.
const UNIQUE_KEY_SEPARATOR: char = '\u{1f}';

/// Value types a property field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// UTF-8 text
    String,
    /// IEEE-754 double (integers included)
    Number,
    /// true / false
    Boolean,
    /// ISO-8601 timestamp, stored as text
    Date,
    /// Arbitrary JSON (objects and arrays)
    Json,
    /// Fixed-dimension float vector for similarity search
    Embedding,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::Json => "json",
            ValueType::Embedding => "embedding",
        }
    }

    /// Whether a JSON value is acceptable for this type.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Date => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            ValueType::Json => value.is_object() || value.is_array(),
            ValueType::Embedding => value
                .as_array()
                .is_some_and(|a| a.iter().all(JsonValue::is_number)),
        }
    }
}

/// Collation applied to string components of a uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collation {
    #[default]
    Binary,
    CaseInsensitive,
}

/// Canonical string form of a single property value, as used in uniqueness
/// keys. Deterministic: objects are serialised with sorted keys.
pub fn canonical_string(value: &JsonValue, collation: Collation) -> String {
    match value {
        JsonValue::Null => UNIQUE_NULL_MARKER.to_string(),
        JsonValue::String(s) => match collation {
            Collation::Binary => s.clone(),
            Collation::CaseInsensitive => s.to_lowercase(),
        },
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => canonical_json(other),
    }
}

/// Deterministic JSON encoding: object keys sorted, no whitespace.
pub fn canonical_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        JsonValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        primitive => serde_json::to_string(primitive).unwrap_or_default(),
    }
}

/// Join already-canonicalised key components into a uniqueness key.
pub fn join_key_components(components: &[String]) -> String {
    components.join(&UNIQUE_KEY_SEPARATOR.to_string())
}

/// Current time, truncated to millisecond precision for stable round-trips
/// through the text columns.
pub fn now() -> DateTime<Utc> {
    let t = Utc::now();
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// Render a timestamp in the canonical on-disk form.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp from its on-disk or caller-supplied form.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, GraphError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GraphError::temporal(format!("invalid timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_accepts() {
        assert!(ValueType::String.accepts(&json!("hi")));
        assert!(!ValueType::String.accepts(&json!(1)));
        assert!(ValueType::Number.accepts(&json!(1.5)));
        assert!(ValueType::Boolean.accepts(&json!(true)));
        assert!(ValueType::Date.accepts(&json!("2024-01-01T00:00:00Z")));
        assert!(!ValueType::Date.accepts(&json!("yesterday")));
        assert!(ValueType::Json.accepts(&json!({"a": 1})));
        assert!(ValueType::Embedding.accepts(&json!([0.1, 0.2])));
        assert!(!ValueType::Embedding.accepts(&json!(["a"])));
    }

    #[test]
    fn test_canonical_string_collation() {
        assert_eq!(
            canonical_string(&json!("Alice"), Collation::Binary),
            "Alice"
        );
        assert_eq!(
            canonical_string(&json!("Alice"), Collation::CaseInsensitive),
            "alice"
        );
        assert_eq!(
            canonical_string(&JsonValue::Null, Collation::Binary),
            UNIQUE_NULL_MARKER
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
        // Key order in the input must not matter
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let t = now();
        let s = format_timestamp(t);
        let back = parse_timestamp(&s).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("not-a-time").is_err());
    }
}
