//! Protocol 001: the original format. PBKDF2-SHA1 derivation, AES-CBC item
//! strings with a *separate* `auth_hash` field, and no embedded IV (a
//! 16-byte zero IV is substituted, matching very old items). Expired
//! 2018-01-01; decrypt-only in practice.
//!
//! Item string format: `001` + base64(ciphertext).

use qn_core::{ProtocolVersion, QnError, QnResult};
use qn_model::{ItemContent, ItemsKeyContent, Payload};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::operator::{EncryptedItem, EncryptionKey, ProtocolOperator};
use crate::primitives;
use crate::root_key::{KeyParams, RootKey};
use crate::v002::{generate_item_key, split_item_key, MIN_PBKDF2_COST};

const DERIVED_LEN: usize = 64;

pub struct V001Operator;

impl V001Operator {
    fn encrypt_string(&self, key_hex: &str, plaintext: &[u8]) -> QnResult<String> {
        let key = primitives::hex_decode(key_hex)?;
        let ciphertext = primitives::aes_cbc_encrypt(&key, &primitives::zero_iv(), plaintext)?;
        Ok(format!("001{}", primitives::base64_encode(&ciphertext)))
    }

    fn decrypt_string(&self, uuid: Uuid, key_hex: &str, string: &str) -> QnResult<Vec<u8>> {
        let fail = || QnError::DecryptFailure {
            uuid: uuid.to_string(),
        };
        let encoded = string.strip_prefix("001").ok_or_else(fail)?;
        let ciphertext = primitives::base64_decode(encoded).map_err(|_| fail())?;
        let key = primitives::hex_decode(key_hex).map_err(|_| fail())?;
        primitives::aes_cbc_decrypt(&key, &primitives::zero_iv(), &ciphertext).map_err(|_| fail())
    }
}

impl ProtocolOperator for V001Operator {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V001
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> QnResult<(RootKey, KeyParams)> {
        let params = KeyParams {
            identifier: Some(identifier.to_string()),
            pw_cost: Some(MIN_PBKDF2_COST),
            pw_salt: Some(primitives::random_hex(16)),
            pw_nonce: None,
            created: None,
            version: ProtocolVersion::V001,
        };
        let key = self.derive_root_key(identifier, password, &params)?;
        Ok((key, params))
    }

    fn derive_root_key(
        &self,
        _identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> QnResult<RootKey> {
        // Minimum cost is enforced client-side; servers advertising less are
        // not honored.
        let cost = params.cost()?.max(MIN_PBKDF2_COST);
        let salt = params.salt()?;
        let derived = Zeroizing::new(primitives::pbkdf2_sha1(
            password.as_bytes(),
            salt.as_bytes(),
            cost,
            DERIVED_LEN,
        ));
        let master_key = hex::encode(&derived[..32]);
        let dak = hex::encode(&derived[32..]);
        Ok(RootKey::new(master_key, Some(dak), ProtocolVersion::V001))
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
        let item_key = generate_item_key();
        let (ek, ak) = split_item_key(&item_key)?;

        let plaintext = serde_json::to_vec(content)
            .map_err(|e| QnError::Other(anyhow::anyhow!("content serialization: {e}")))?;
        let content_string = self.encrypt_string(ek, &plaintext)?;
        let auth_key = primitives::hex_decode(ak)?;
        let auth_hash = hex::encode(primitives::hmac_sha256(
            &auth_key,
            content_string.as_bytes(),
        )?);

        let enc_item_key = self.encrypt_string(key.encryption_key_hex(), item_key.as_bytes())?;

        Ok(EncryptedItem {
            content: content_string,
            enc_item_key: Some(enc_item_key),
            auth_hash: Some(auth_hash),
        })
    }

    fn decrypt_item(&self, payload: &Payload, key: &EncryptionKey<'_>) -> QnResult<ItemContent> {
        let fail = || QnError::DecryptFailure {
            uuid: payload.uuid.to_string(),
        };
        let content_string = payload.encrypted_content().ok_or_else(fail)?;
        let enc_item_key = payload.enc_item_key.as_deref().ok_or_else(fail)?;

        let item_key_bytes = Zeroizing::new(self.decrypt_string(
            payload.uuid,
            key.encryption_key_hex(),
            enc_item_key,
        )?);
        let item_key_hex = std::str::from_utf8(&item_key_bytes).map_err(|_| fail())?;
        let (ek, ak) = split_item_key(item_key_hex)?;

        if let Some(auth_hash) = payload.auth_hash.as_deref() {
            let auth_key = primitives::hex_decode(ak).map_err(|_| fail())?;
            let tag = primitives::hex_decode(auth_hash).map_err(|_| fail())?;
            if !primitives::hmac_sha256_verify(&auth_key, content_string.as_bytes(), &tag) {
                return Err(fail());
            }
        }

        let plaintext = self.decrypt_string(payload.uuid, ek, content_string)?;
        serde_json::from_slice(&plaintext).map_err(|_| fail())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::PayloadFormat;
    use qn_core::ContentType;
    use serde_json::json;

    fn encrypted_note(op: &V001Operator, root: &RootKey) -> Payload {
        let mut content = ItemContent::new();
        content.set_extra("title", json!("ancient"));
        let payload = Payload::new_decrypted(ContentType::Note, content);
        op.encrypt_parameters(
            &payload,
            Some(&EncryptionKey::Root(root)),
            PayloadFormat::EncryptedString,
        )
        .unwrap()
    }

    #[test]
    fn test_min_cost_enforced() {
        let op = V001Operator;
        let (_, mut params) = op.create_root_key("a@b.c", "pw").unwrap();
        params.pw_cost = Some(1);
        let low = op.derive_root_key("a@b.c", "pw", &params).unwrap();
        params.pw_cost = Some(MIN_PBKDF2_COST);
        let floor = op.derive_root_key("a@b.c", "pw", &params).unwrap();
        assert!(low.matches(&floor), "cost below minimum is clamped up");
    }

    #[test]
    fn test_roundtrip_with_auth_hash() {
        let op = V001Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let encrypted = encrypted_note(&op, &root);

        assert!(encrypted.encrypted_content().unwrap().starts_with("001"));
        assert!(!encrypted.encrypted_content().unwrap().contains(':'));
        assert!(encrypted.auth_hash.is_some());

        let decrypted = op
            .decrypt_item(&encrypted, &EncryptionKey::Root(&root))
            .unwrap();
        assert_eq!(decrypted.get_extra_str("title"), Some("ancient"));
    }

    #[test]
    fn test_tampered_content_fails_auth() {
        let op = V001Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let encrypted = encrypted_note(&op, &root);

        let string = encrypted.encrypted_content().unwrap().to_string();
        let mut chars: Vec<char> = string.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let tampered = encrypted.mutated(|p| {
            p.content = Some(qn_model::PayloadContent::Encrypted(
                chars.into_iter().collect(),
            ));
        });

        assert!(matches!(
            op.decrypt_item(&tampered, &EncryptionKey::Root(&root)),
            Err(QnError::DecryptFailure { .. })
        ));
    }

    #[test]
    fn test_decrypt_without_auth_hash_still_works() {
        // Some very old items never carried an auth hash.
        let op = V001Operator;
        let (root, _) = op.create_root_key("a@b.c", "pw").unwrap();
        let encrypted = encrypted_note(&op, &root).mutated(|p| p.auth_hash = None);

        let decrypted = op
            .decrypt_item(&encrypted, &EncryptionKey::Root(&root))
            .unwrap();
        assert_eq!(decrypted.get_extra_str("title"), Some("ancient"));
    }
}
