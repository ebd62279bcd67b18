//! Field projections: which payload fields survive a copy for a given
//! intent or source.

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Where a payload batch originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadSource {
    Constructor,
    LocalChanged,
    LocalSaved,
    LocalRetrieved,
    RemoteRetrieved,
    RemoteSaved,
    FileImport,
    SessionHistory,
    ComponentRetrieved,
    DecryptedTransient,
}

/// Named field sets a payload copy can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFieldSet {
    Max,
    EncryptionParameters,
    File,
    Storage,
    Server,
    ServerSaved,
    SessionHistory,
    ComponentRetrieved,
}

impl PayloadSource {
    pub fn field_set(self) -> PayloadFieldSet {
        match self {
            PayloadSource::Constructor
            | PayloadSource::LocalChanged
            | PayloadSource::LocalSaved
            | PayloadSource::LocalRetrieved
            | PayloadSource::DecryptedTransient => PayloadFieldSet::Max,
            PayloadSource::RemoteRetrieved => PayloadFieldSet::Server,
            PayloadSource::RemoteSaved => PayloadFieldSet::ServerSaved,
            PayloadSource::FileImport => PayloadFieldSet::File,
            PayloadSource::SessionHistory => PayloadFieldSet::SessionHistory,
            PayloadSource::ComponentRetrieved => PayloadFieldSet::ComponentRetrieved,
        }
    }
}

impl Payload {
    /// Copy restricted to a field set; uuid and content_type always survive,
    /// everything else defaults unless the set lists it.
    pub fn project(&self, set: PayloadFieldSet) -> Payload {
        if matches!(set, PayloadFieldSet::Max | PayloadFieldSet::Storage) {
            // Storage keeps the full client view.
            return self.clone();
        }

        let mut out = Payload::new(self.uuid, self.content_type);
        match set {
            PayloadFieldSet::Max | PayloadFieldSet::Storage => unreachable!(),
            PayloadFieldSet::EncryptionParameters => {
                out.content = self.content.clone();
                out.enc_item_key = self.enc_item_key.clone();
                out.items_key_id = self.items_key_id;
                out.auth_hash = self.auth_hash.clone();
                out.error_decrypting = self.error_decrypting;
                out.error_decrypting_changed = self.error_decrypting_changed;
                out.waiting_for_key = self.waiting_for_key;
            }
            PayloadFieldSet::File => {
                out.content = self.content.clone();
                out.enc_item_key = self.enc_item_key.clone();
                out.items_key_id = self.items_key_id;
                out.created_at = self.created_at;
                out.updated_at = self.updated_at;
                out.deleted = self.deleted;
                out.auth_hash = self.auth_hash.clone();
                out.auth_params = self.auth_params.clone();
            }
            PayloadFieldSet::Server => {
                out.content = self.content.clone();
                out.enc_item_key = self.enc_item_key.clone();
                out.items_key_id = self.items_key_id;
                out.created_at = self.created_at;
                out.updated_at = self.updated_at;
                out.deleted = self.deleted;
                out.auth_hash = self.auth_hash.clone();
                out.auth_params = self.auth_params.clone();
            }
            PayloadFieldSet::ServerSaved => {
                out.created_at = self.created_at;
                out.updated_at = self.updated_at;
                out.deleted = self.deleted;
            }
            PayloadFieldSet::SessionHistory => {
                out.content = self.content.clone();
                out.updated_at = self.updated_at;
            }
            PayloadFieldSet::ComponentRetrieved => {
                out.content = self.content.clone();
                out.created_at = self.created_at;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ItemContent;
    use crate::payload::PayloadContent;
    use qn_core::ContentType;
    use uuid::Uuid;

    fn full_payload() -> Payload {
        let mut payload = Payload::new(Uuid::new_v4(), ContentType::Note);
        payload.content = Some(PayloadContent::Decrypted(ItemContent::new()));
        payload.items_key_id = Some(Uuid::new_v4());
        payload.enc_item_key = Some("004:n:c:a".into());
        payload.created_at = 100;
        payload.updated_at = 200;
        payload.dirty = true;
        payload.dirtied_at = Some(150);
        payload.last_sync_begin = Some(160);
        payload.waiting_for_key = true;
        payload
    }

    #[test]
    fn test_server_set_strips_client_flags() {
        let projected = full_payload().project(PayloadFieldSet::Server);
        assert!(!projected.dirty);
        assert!(projected.dirtied_at.is_none());
        assert!(projected.last_sync_begin.is_none());
        assert!(!projected.waiting_for_key);
        // Server fields survive.
        assert!(projected.content.is_some());
        assert_eq!(projected.updated_at, 200);
    }

    #[test]
    fn test_server_saved_set_drops_content() {
        let projected = full_payload().project(PayloadFieldSet::ServerSaved);
        assert!(projected.content.is_none());
        assert!(projected.enc_item_key.is_none());
        assert_eq!(projected.updated_at, 200);
    }

    #[test]
    fn test_max_keeps_everything() {
        let payload = full_payload();
        let projected = payload.project(PayloadFieldSet::Max);
        assert_eq!(projected, payload);
    }

    #[test]
    fn test_source_mapping() {
        assert_eq!(
            PayloadSource::RemoteRetrieved.field_set(),
            PayloadFieldSet::Server
        );
        assert_eq!(
            PayloadSource::LocalChanged.field_set(),
            PayloadFieldSet::Max
        );
        assert_eq!(
            PayloadSource::FileImport.field_set(),
            PayloadFieldSet::File
        );
    }
}
