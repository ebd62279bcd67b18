//! The payload record: the atomic, immutable unit of persistence and
//! transfer. Mutation always produces a new payload.

use qn_core::time::UnixMillis;
use qn_core::{ContentType, ProtocolVersion};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ItemContent;

/// Payload content: a structured map once decrypted, or a version-prefixed
/// ciphertext string before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadContent {
    Encrypted(String),
    Decrypted(ItemContent),
}

impl PayloadContent {
    pub fn as_decrypted(&self) -> Option<&ItemContent> {
        match self {
            PayloadContent::Decrypted(c) => Some(c),
            PayloadContent::Encrypted(_) => None,
        }
    }

    pub fn as_encrypted(&self) -> Option<&str> {
        match self {
            PayloadContent::Encrypted(s) => Some(s),
            PayloadContent::Decrypted(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub uuid: Uuid,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<PayloadContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_key_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    #[serde(default)]
    pub created_at: UnixMillis,
    #[serde(default)]
    pub updated_at: UnixMillis,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    // Client-side flags; stripped by the server field set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirtied_at: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_begin: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_end: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error_decrypting: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error_decrypting_changed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub waiting_for_key: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dummy: bool,

    // Legacy 001 authentication fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<serde_json::Value>,
}

impl Payload {
    pub fn new(uuid: Uuid, content_type: ContentType) -> Self {
        Self {
            uuid,
            content_type,
            content: None,
            items_key_id: None,
            enc_item_key: None,
            created_at: 0,
            updated_at: 0,
            deleted: false,
            dirty: false,
            dirtied_at: None,
            last_sync_begin: None,
            last_sync_end: None,
            error_decrypting: false,
            error_decrypting_changed: false,
            waiting_for_key: false,
            dummy: false,
            auth_hash: None,
            auth_params: None,
        }
    }

    /// Fresh decrypted payload with a random uuid, stamped created_at.
    pub fn new_decrypted(content_type: ContentType, content: ItemContent) -> Self {
        let mut payload = Payload::new(Uuid::new_v4(), content_type);
        payload.content = Some(PayloadContent::Decrypted(content));
        payload.created_at = qn_core::time::now_ms();
        payload
    }

    /// Copy with caller edits applied; the receiver is untouched.
    pub fn mutated<F: FnOnce(&mut Payload)>(&self, f: F) -> Payload {
        let mut copy = self.clone();
        f(&mut copy);
        copy
    }

    pub fn decrypted_content(&self) -> Option<&ItemContent> {
        self.content.as_ref().and_then(PayloadContent::as_decrypted)
    }

    pub fn encrypted_content(&self) -> Option<&str> {
        self.content.as_ref().and_then(PayloadContent::as_encrypted)
    }

    /// Version of the ciphertext string, if the content is encrypted.
    pub fn content_version(&self) -> Option<ProtocolVersion> {
        self.encrypted_content().and_then(ProtocolVersion::from_prefix)
    }

    /// Whether this payload belongs in the upload dirty set.
    ///
    /// A corrupt item may be synced only as a deletion.
    pub fn is_uploadable_dirty(&self) -> bool {
        self.dirty && !self.dummy && (!self.error_decrypting || self.deleted)
    }

    /// A retrieved payload that is deleted and not locally dirty is safe to
    /// drop from the collection after emission.
    pub fn is_discardable(&self) -> bool {
        self.deleted && !self.dirty
    }

    /// Items keys created locally and never acknowledged by the server.
    pub fn never_synced(&self) -> bool {
        self.updated_at <= 0
    }
}
