//! Protocol 003: the last root-key-wrapped item version. Same item codec as
//! 002, with a modern PBKDF2 cost and a nonce-derived salt.

use qn_core::{ProtocolVersion, QnResult};
use qn_model::{ItemContent, ItemsKeyContent, Payload};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::operator::{EncryptedItem, EncryptionKey, ProtocolOperator};
use crate::primitives;
use crate::root_key::{KeyParams, RootKey};
use crate::v002;

pub(crate) const PBKDF2_COST: u32 = 110_000;

const DERIVED_LEN: usize = 96;

pub struct V003Operator;

impl V003Operator {
    fn derive(&self, identifier: &str, password: &str, nonce: &str, cost: u32) -> RootKey {
        let salt = primitives::sha256_hex(format!("{identifier}:{nonce}").as_bytes());
        let derived = Zeroizing::new(primitives::pbkdf2_sha512(
            password.as_bytes(),
            salt.as_bytes(),
            cost,
            DERIVED_LEN,
        ));
        v002::split_derived(&derived, ProtocolVersion::V003)
    }
}

impl ProtocolOperator for V003Operator {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V003
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> QnResult<(RootKey, KeyParams)> {
        let nonce = primitives::random_hex(32);
        let key = self.derive(identifier, password, &nonce, PBKDF2_COST);
        let params = KeyParams {
            identifier: Some(identifier.to_string()),
            pw_cost: Some(PBKDF2_COST),
            pw_salt: None,
            pw_nonce: Some(nonce),
            created: None,
            version: ProtocolVersion::V003,
        };
        Ok((key, params))
    }

    fn derive_root_key(
        &self,
        identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> QnResult<RootKey> {
        let cost = params.cost()?.max(PBKDF2_COST);
        Ok(self.derive(identifier, password, params.nonce()?, cost))
    }

    fn create_items_key_content(&self, root_key: &RootKey) -> ItemsKeyContent {
        root_key.mirrored_items_key_content()
    }

    fn encrypt_item(
        &self,
        uuid: Uuid,
        content: &ItemContent,
        key: &EncryptionKey<'_>,
    ) -> QnResult<EncryptedItem> {
        v002::legacy_encrypt_item(ProtocolVersion::V003, uuid, content, key)
    }

    fn decrypt_item(&self, payload: &Payload, key: &EncryptionKey<'_>) -> QnResult<ItemContent> {
        v002::legacy_decrypt_item(ProtocolVersion::V003, payload, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::PayloadFormat;
    use qn_core::{ContentType, QnError};
    use serde_json::json;

    #[test]
    fn test_derive_uses_nonce_salt() {
        let op = V003Operator;
        let (key, params) = op.create_root_key("a@b.c", "pw").unwrap();
        assert_eq!(key.version(), ProtocolVersion::V003);
        assert!(params.pw_nonce.is_some());
        assert!(params.pw_salt.is_none());

        let again = op.derive_root_key("a@b.c", "pw", &params).unwrap();
        assert!(key.matches(&again));

        // A different identifier changes the salt, and thus the key.
        let other = op.derive_root_key("x@y.z", "pw", &params).unwrap();
        assert!(!key.matches(&other));
    }

    #[test]
    fn test_items_key_mirrors_root() {
        let op = V003Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let mirrored = op.create_items_key_content(&root);
        assert_eq!(mirrored.items_key, root.master_key_hex());
        assert_eq!(mirrored.version, ProtocolVersion::V003);
    }

    #[test]
    fn test_item_roundtrip_with_mirrored_key() {
        let op = V003Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let mirrored = op.create_items_key_content(&root);
        let key_uuid = Uuid::new_v4();

        let mut content = ItemContent::new();
        content.set_extra("title", json!("T3"));
        let payload = Payload::new_decrypted(ContentType::Note, content);
        let encrypted = op
            .encrypt_parameters(
                &payload,
                Some(&EncryptionKey::Items {
                    uuid: key_uuid,
                    content: &mirrored,
                }),
                PayloadFormat::EncryptedString,
            )
            .unwrap();
        assert!(encrypted.encrypted_content().unwrap().starts_with("003:"));

        // Root key and mirrored items key are interchangeable at 003.
        let via_root = op
            .decrypt_item(&encrypted, &EncryptionKey::Root(&root))
            .unwrap();
        assert_eq!(via_root.get_extra_str("title"), Some("T3"));
    }

    #[test]
    fn test_byte_tamper_yields_decrypt_failure() {
        let op = V003Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let mut content = ItemContent::new();
        content.set_extra("title", json!("x"));
        let payload = Payload::new_decrypted(ContentType::Note, content);
        let encrypted = op
            .encrypt_parameters(
                &payload,
                Some(&EncryptionKey::Root(&root)),
                PayloadFormat::EncryptedString,
            )
            .unwrap();

        let string = encrypted.encrypted_content().unwrap().to_string();
        let mut bytes: Vec<char> = string.chars().collect();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == 'A' { 'B' } else { 'A' };
        let tampered = encrypted.mutated(|p| {
            p.content = Some(qn_model::PayloadContent::Encrypted(
                bytes.into_iter().collect(),
            ));
        });

        assert!(matches!(
            op.decrypt_item(&tampered, &EncryptionKey::Root(&root)),
            Err(QnError::DecryptFailure { .. })
        ));
    }
}
