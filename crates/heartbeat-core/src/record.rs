//! Heartbeat document schema and the index that enumerates liveness records.
//!
//! Documents are JSON objects of the form
//! `{"type": "heartbeat" | "heartbeat_timeout", "node_uuid": "<node id>"}`.
//! Nodes running other implementations read the same documents, so the field
//! names and tags must not change.

use crate::keys::{DOC_TYPE_HEARTBEAT, KeySpace};
use crate::store::IndexDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Design namespace that holds the heartbeat index.
pub const INDEX_NAMESPACE: &str = "cbgt";

/// Name of the index emitting one row per liveness record.
pub const INDEX_NAME: &str = "heartbeats";

/// Bump when the index definition changes to force redefinition on every store.
pub const INDEX_VERSION: u64 = 1;

/// Kind tag stored in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    /// Liveness record, never expires
    Heartbeat,
    /// Expiry record, lives for two send intervals
    HeartbeatTimeout,
}

/// A heartbeat document as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatDoc {
    #[serde(rename = "type")]
    pub kind: DocKind,
    pub node_uuid: String,
}

impl HeartbeatDoc {
    pub fn liveness(node_id: impl Into<String>) -> Self {
        Self {
            kind: DocKind::Heartbeat,
            node_uuid: node_id.into(),
        }
    }

    pub fn expiry(node_id: impl Into<String>) -> Self {
        Self {
            kind: DocKind::HeartbeatTimeout,
            node_uuid: node_id.into(),
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Index over liveness records: emits `(document id, node_uuid)` for every
/// document whose `type` is `heartbeat`.
pub fn heartbeat_index(keys: &KeySpace) -> IndexDefinition {
    IndexDefinition {
        namespace: INDEX_NAMESPACE.to_string(),
        name: INDEX_NAME.to_string(),
        version_key: keys.index_version_key(),
        version: INDEX_VERSION,
        match_field: "type".to_string(),
        match_value: DOC_TYPE_HEARTBEAT.to_string(),
        emit_field: "node_uuid".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let liveness = HeartbeatDoc::liveness("node-1").to_value().unwrap();
        assert_eq!(liveness, json!({"type": "heartbeat", "node_uuid": "node-1"}));

        let expiry = HeartbeatDoc::expiry("node-1").to_value().unwrap();
        assert_eq!(
            expiry,
            json!({"type": "heartbeat_timeout", "node_uuid": "node-1"})
        );
    }

    #[test]
    fn test_serialized_field_order() {
        let text = serde_json::to_string(&HeartbeatDoc::liveness("n")).unwrap();
        assert_eq!(text, r#"{"type":"heartbeat","node_uuid":"n"}"#);
    }

    #[test]
    fn test_parse_foreign_document() {
        let doc: HeartbeatDoc =
            serde_json::from_str(r#"{"node_uuid":"abc","type":"heartbeat_timeout"}"#).unwrap();
        assert_eq!(doc, HeartbeatDoc::expiry("abc"));
    }

    #[test]
    fn test_index_emits_liveness_records_only() {
        let index = heartbeat_index(&KeySpace::new("p_"));
        assert_eq!(index.version_key, "p_ddocVersion");

        let row = index
            .emit("p_heartbeat:a", &json!({"type": "heartbeat", "node_uuid": "a"}))
            .unwrap();
        assert_eq!(row.id, "p_heartbeat:a");
        assert_eq!(row.value.as_deref(), Some("a"));

        assert!(
            index
                .emit(
                    "p_heartbeat_timeout:a",
                    &json!({"type": "heartbeat_timeout", "node_uuid": "a"})
                )
                .is_none()
        );
        assert!(index.emit("p_ddocVersion", &json!(1)).is_none());
    }

    #[test]
    fn test_index_row_without_owner() {
        let index = heartbeat_index(&KeySpace::default());

        let row = index.emit("heartbeat:", &json!({"type": "heartbeat"})).unwrap();
        assert_eq!(row.value, None);

        let row = index
            .emit("heartbeat:", &json!({"type": "heartbeat", "node_uuid": 42}))
            .unwrap();
        assert_eq!(row.value, None);
    }
}
