//! Wire protocol types. Server-format payloads omit every client-only
//! field; the `Payload` serde representation skips defaults, so a projected
//! copy serializes to exactly the server shape.

use qn_model::{Payload, PayloadFieldSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub items: Vec<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    pub limit: usize,
    #[serde(rename = "computeIntegrity")]
    pub compute_integrity: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub retrieved_items: Vec<Payload>,
    #[serde(default)]
    pub saved_items: Vec<Payload>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The uuid is taken by an item the account cannot overwrite.
    UuidConflict,
    /// The server copy changed since this client last saw it.
    SyncConflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_item: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsaved_item: Option<Payload>,
}

/// Project a payload into its outbound server form. Tombstones upload with
/// their content discarded.
pub fn to_server_payload(payload: &Payload) -> Payload {
    let mut server = payload.project(PayloadFieldSet::Server);
    if server.deleted {
        server.content = None;
        server.enc_item_key = None;
        server.auth_hash = None;
        server.items_key_id = None;
    }
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use qn_core::ContentType;
    use qn_model::{ItemContent, PayloadContent};
    use uuid::Uuid;

    #[test]
    fn test_server_payload_strips_client_fields() {
        let mut payload =
            qn_model::Payload::new_decrypted(ContentType::Note, ItemContent::new());
        payload.dirty = true;
        payload.dirtied_at = Some(10);
        payload.waiting_for_key = true;

        let server = to_server_payload(&payload);
        let json = serde_json::to_value(&server).unwrap();
        assert!(json.get("dirty").is_none());
        assert!(json.get("dirtied_at").is_none());
        assert!(json.get("waiting_for_key").is_none());
        assert!(json.get("uuid").is_some());
    }

    #[test]
    fn test_tombstone_uploads_empty() {
        let mut payload = qn_model::Payload::new(Uuid::new_v4(), ContentType::Note);
        payload.content = Some(PayloadContent::Encrypted("004:a:b:c".into()));
        payload.deleted = true;
        payload.dirty = true;

        let server = to_server_payload(&payload);
        assert!(server.deleted);
        assert!(server.content.is_none());
        assert!(server.enc_item_key.is_none());
    }

    #[test]
    fn test_conflict_serde_tags() {
        let json = serde_json::json!({
            "type": "uuid_conflict",
        });
        let conflict: SyncConflict = serde_json::from_value(json).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::UuidConflict);

        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["type"], "uuid_conflict");
    }
}
