use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::keyspace;

/// Fields owned by the store, never part of a payload
const SYSTEM_FIELDS: [&str; 2] = ["_id", "_rev"];

/// Represents a JSON document in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Full document id (`<namespace>:<local-key>`), empty until assigned
    #[serde(rename = "_id", default)]
    pub id: String,

    /// Revision used for last-writer-wins reconciliation, 0 = never written
    #[serde(rename = "_rev", default)]
    pub revision: u64,

    /// The actual document data
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Document {
    /// Create a document from an id and a JSON object.
    ///
    /// Non-object values are stored under a single `value` field.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            revision: 0,
            payload: Self::strip_system_fields(data),
        }
    }

    /// Create a document whose id will be generated by the store inside
    /// `namespace`
    pub fn in_namespace(namespace: &str, data: Value) -> Self {
        Self::new(keyspace::prefix(namespace), data)
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    fn strip_system_fields(data: Value) -> Map<String, Value> {
        match data {
            Value::Object(mut obj) => {
                for field in SYSTEM_FIELDS {
                    obj.remove(field);
                }
                obj
            }
            Value::Null => Map::new(),
            other => {
                let mut obj = Map::new();
                obj.insert("value".to_string(), other);
                obj
            }
        }
    }

    /// Namespace derived from the id
    pub fn namespace(&self) -> Option<&str> {
        keyspace::namespace_of(&self.id)
    }

    /// Get a field from the document
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "_id" => Some(Value::String(self.id.clone())),
            "_rev" => Some(Value::from(self.revision)),
            _ => self.payload.get(field).cloned(),
        }
    }

    /// Shallow-merge `patch` into the payload. System fields in the patch
    /// are ignored.
    pub fn merge(&mut self, patch: Value) {
        for (key, value) in Self::strip_system_fields(patch) {
            self.payload.insert(key, value);
        }
    }

    /// Convert to JSON value including `_id` and `_rev`
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Next revision after `previous`: strictly greater than it and never behind
/// the wall clock in milliseconds.
pub fn next_revision(previous: u64) -> u64 {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    now.max(previous.saturating_add(1))
}

/// Response of a successful put
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub id: String,
    pub ok: bool,
    #[serde(rename = "rev")]
    pub revision: u64,
}

/// Response of a remove; `ok` is true even when nothing was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_strips_system_fields() {
        let doc = Document::new(
            "products:1",
            json!({"_id": "other:9", "_rev": 7, "name": "Classic Burger"}),
        );
        assert_eq!(doc.id, "products:1");
        assert_eq!(doc.revision, 0);
        assert_eq!(doc.payload.len(), 1);
        assert_eq!(doc.get("name"), Some(json!("Classic Burger")));
    }

    #[test]
    fn test_in_namespace_leaves_local_key_empty() {
        let doc = Document::in_namespace("orders", json!({"total": 12.5}));
        assert_eq!(doc.id, "orders:");
        assert_eq!(doc.namespace(), Some("orders"));
    }

    #[test]
    fn test_scalar_payload_is_wrapped() {
        let doc = Document::new("notes:1", json!("hello"));
        assert_eq!(doc.get("value"), Some(json!("hello")));
    }

    #[test]
    fn test_get_system_fields() {
        let doc = Document::new("sales:3", json!({"total": 40})).with_revision(5);
        assert_eq!(doc.get("_id"), Some(json!("sales:3")));
        assert_eq!(doc.get("_rev"), Some(json!(5)));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut doc = Document::new("products:1", json!({"name": "Pizza", "stock": 40}));
        doc.merge(json!({"stock": 38, "_rev": 99}));
        assert_eq!(doc.get("name"), Some(json!("Pizza")));
        assert_eq!(doc.get("stock"), Some(json!(38)));
        assert_eq!(doc.revision, 0);
    }

    #[test]
    fn test_json_shape_is_flat() {
        let doc = Document::new("products:2", json!({"price": 14.99})).with_revision(3);
        let value = doc.to_value();
        assert_eq!(value, json!({"_id": "products:2", "_rev": 3, "price": 14.99}));

        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_missing_rev_decodes_as_zero() {
        let doc: Document = serde_json::from_value(json!({"_id": "a:1", "x": 1})).unwrap();
        assert_eq!(doc.revision, 0);
        assert!(!doc.payload.contains_key("_id"));
    }

    #[test]
    fn test_next_revision_is_monotonic() {
        let far_future = u64::MAX / 2;
        assert_eq!(next_revision(far_future), far_future + 1);
        assert!(next_revision(0) > 0);
        assert_eq!(next_revision(u64::MAX), u64::MAX);
    }
}
