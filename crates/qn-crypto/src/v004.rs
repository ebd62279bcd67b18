//! Protocol 004: Argon2id root-key derivation and XChaCha20-Poly1305 item
//! encryption.
//!
//! Item string format:
//! ```text
//! 004:<nonce hex, 24 bytes>:<ciphertext base64>:<aad base64>
//! aad = base64({"u":"<uuid>","v":"004"}); the base64 bytes are authenticated
//! ```
//!
//! A random per-item key encrypts the content; `enc_item_key` carries that
//! key wrapped under the referenced items key (or the root key for
//! root-encrypted content types). The root key no longer wraps per-item keys
//! directly.

use argon2::{Algorithm, Argon2, Params, Version};
use qn_core::{ProtocolVersion, QnError, QnResult};
use qn_model::{ItemContent, ItemsKeyContent, Payload};
use serde_json::json;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::operator::{EncryptedItem, EncryptionKey, ProtocolOperator};
use crate::primitives;
use crate::root_key::{KeyParams, RootKey};
use crate::{KEY_SIZE, NONCE_SIZE};

const ARGON2_OUTPUT_LEN: usize = 64;
const ARGON2_SALT_LEN: usize = 16;

/// Argon2id cost parameters; tests lower these.
#[derive(Debug, Clone)]
pub struct Argon2Costs {
    pub mem_cost_kib: u32,
    pub time_cost: u32,
}

impl Default for Argon2Costs {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 5,
        }
    }
}

pub struct V004Operator {
    costs: Argon2Costs,
}

impl V004Operator {
    pub fn new(costs: Argon2Costs) -> Self {
        Self { costs }
    }

    fn derive(&self, identifier: &str, password: &str, nonce: &str) -> QnResult<RootKey> {
        let salt_input = format!("{identifier}:{nonce}");
        let digest = primitives::sha256(salt_input.as_bytes());
        let salt = &digest[..ARGON2_SALT_LEN];

        let params = Params::new(
            self.costs.mem_cost_kib,
            self.costs.time_cost,
            1,
            Some(ARGON2_OUTPUT_LEN),
        )
        .map_err(|e| QnError::Other(anyhow::anyhow!("invalid Argon2id params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut derived = Zeroizing::new([0u8; ARGON2_OUTPUT_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, derived.as_mut())
            .map_err(|e| QnError::Other(anyhow::anyhow!("Argon2id KDF failed: {e}")))?;

        // First half is the master key; the second half is the server
        // password, which never enters the core.
        let master_key = hex::encode(&derived[..KEY_SIZE]);
        Ok(RootKey::new(master_key, None, ProtocolVersion::V004))
    }

    fn encrypt_string(&self, uuid: Uuid, key_hex: &str, plaintext: &[u8]) -> QnResult<String> {
        let key = primitives::key_from_hex(key_hex)?;
        let nonce_bytes = primitives::random_bytes(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.try_into().expect("nonce length");

        let aad = primitives::base64_encode(
            json!({"u": uuid.to_string(), "v": "004"}).to_string().as_bytes(),
        );
        let ciphertext = primitives::xchacha_encrypt(&key, &nonce, aad.as_bytes(), plaintext)?;

        Ok(format!(
            "004:{}:{}:{aad}",
            hex::encode(nonce),
            primitives::base64_encode(&ciphertext)
        ))
    }

    fn decrypt_string(&self, expected_uuid: Uuid, key_hex: &str, string: &str) -> QnResult<Vec<u8>> {
        let fail = || QnError::DecryptFailure {
            uuid: expected_uuid.to_string(),
        };

        let components: Vec<&str> = string.split(':').collect();
        let [version, nonce_hex, ciphertext_b64, aad] = components[..] else {
            return Err(fail());
        };
        if version != "004" {
            return Err(fail());
        }

        // The authenticated data binds the ciphertext to its item; a uuid
        // mismatch is a tamper signal.
        let aad_json = primitives::base64_decode(aad).map_err(|_| fail())?;
        let aad_value: serde_json::Value =
            serde_json::from_slice(&aad_json).map_err(|_| fail())?;
        let bound_uuid = aad_value
            .get("u")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(fail)?;
        if bound_uuid != expected_uuid {
            return Err(fail());
        }

        let key = primitives::key_from_hex(key_hex).map_err(|_| fail())?;
        let nonce_bytes = primitives::hex_decode(nonce_hex).map_err(|_| fail())?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.try_into().map_err(|_| fail())?;
        let ciphertext = primitives::base64_decode(ciphertext_b64).map_err(|_| fail())?;

        primitives::xchacha_decrypt(&key, &nonce, aad.as_bytes(), &ciphertext).map_err(|_| fail())
    }
}

impl ProtocolOperator for V004Operator {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V004
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> QnResult<(RootKey, KeyParams)> {
        let nonce = primitives::random_hex(32);
        let key = self.derive(identifier, password, &nonce)?;
        let params = KeyParams {
            identifier: Some(identifier.to_string()),
            pw_cost: None,
            pw_salt: None,
            pw_nonce: Some(nonce),
            created: Some(qn_core::time::now_ms().to_string()),
            version: ProtocolVersion::V004,
        };
        Ok((key, params))
    }

    fn derive_root_key(
        &self,
        identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> QnResult<RootKey> {
        self.derive(identifier, password, params.nonce()?)
    }

    fn create_items_key_content(&self, _root_key: &RootKey) -> ItemsKeyContent {
        ItemsKeyContent {
            items_key: primitives::random_hex(KEY_SIZE),
            data_authentication_key: None,
            version: ProtocolVersion::V004,
            is_default: false,
        }
    }

    fn encrypt_item(
        &self,
        uuid: Uuid,
        content: &ItemContent,
        key: &EncryptionKey<'_>,
    ) -> QnResult<EncryptedItem> {
        let item_key = Zeroizing::new(primitives::random_hex(KEY_SIZE));
        let plaintext = serde_json::to_vec(content)
            .map_err(|e| QnError::Other(anyhow::anyhow!("content serialization: {e}")))?;

        let content_string = self.encrypt_string(uuid, &item_key, &plaintext)?;
        let enc_item_key =
            self.encrypt_string(uuid, key.encryption_key_hex(), item_key.as_bytes())?;

        Ok(EncryptedItem {
            content: content_string,
            enc_item_key: Some(enc_item_key),
            auth_hash: None,
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
        let item_key_hex =
            std::str::from_utf8(&item_key_bytes).map_err(|_| fail())?;

        let plaintext = self.decrypt_string(payload.uuid, item_key_hex, content_string)?;
        serde_json::from_slice(&plaintext).map_err(|_| fail())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qn_core::ContentType;
    use serde_json::json;

    fn fast_operator() -> V004Operator {
        V004Operator::new(Argon2Costs {
            mem_cost_kib: 1024,
            time_cost: 1,
        })
    }

    fn items_key(op: &V004Operator) -> ItemsKeyContent {
        let root = RootKey::new("00".repeat(32), None, ProtocolVersion::V004);
        op.create_items_key_content(&root)
    }

    fn note_payload(op: &V004Operator, key_uuid: Uuid, key: &ItemsKeyContent) -> Payload {
        let mut content = ItemContent::new();
        content.set_extra("title", json!("T"));
        content.set_extra("text", json!("X"));
        let payload = Payload::new_decrypted(ContentType::Note, content);
        op.encrypt_parameters(
            &payload,
            Some(&EncryptionKey::Items {
                uuid: key_uuid,
                content: key,
            }),
            crate::operator::PayloadFormat::EncryptedString,
        )
        .unwrap()
    }

    #[test]
    fn test_derive_deterministic_and_password_sensitive() {
        let op = fast_operator();
        let (key, params) = op.create_root_key("a@b.c", "correct horse").unwrap();
        assert_eq!(key.version(), ProtocolVersion::V004);
        assert!(key.data_authentication_key_hex().is_none());

        let again = op.derive_root_key("a@b.c", "correct horse", &params).unwrap();
        assert!(key.matches(&again));

        let wrong = op.derive_root_key("a@b.c", "incorrect horse", &params).unwrap();
        assert!(!key.matches(&wrong));
    }

    #[test]
    fn test_item_roundtrip() {
        let op = fast_operator();
        let key_content = items_key(&op);
        let key_uuid = Uuid::new_v4();
        let encrypted = note_payload(&op, key_uuid, &key_content);

        assert!(encrypted.encrypted_content().unwrap().starts_with("004:"));
        assert!(encrypted.enc_item_key.as_deref().unwrap().starts_with("004:"));
        assert_eq!(encrypted.items_key_id, Some(key_uuid));
        assert!(encrypted.auth_hash.is_none());

        let decrypted = op
            .decrypt_item(
                &encrypted,
                &EncryptionKey::Items {
                    uuid: key_uuid,
                    content: &key_content,
                },
            )
            .unwrap();
        assert_eq!(decrypted.get_extra_str("title"), Some("T"));
        assert_eq!(decrypted.get_extra_str("text"), Some("X"));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let op = fast_operator();
        let key_content = items_key(&op);
        let key_uuid = Uuid::new_v4();
        let encrypted = note_payload(&op, key_uuid, &key_content);

        let original = encrypted.encrypted_content().unwrap().to_string();
        let mut parts: Vec<String> = original.split(':').map(str::to_string).collect();
        // Flip a character inside the base64 ciphertext.
        let mut chars: Vec<char> = parts[2].chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        parts[2] = chars.into_iter().collect();
        let tampered = encrypted.mutated(|p| {
            p.content = Some(qn_model::PayloadContent::Encrypted(parts.join(":")));
        });

        let result = op.decrypt_item(
            &tampered,
            &EncryptionKey::Items {
                uuid: key_uuid,
                content: &key_content,
            },
        );
        assert!(matches!(result, Err(QnError::DecryptFailure { .. })));
    }

    #[test]
    fn test_uuid_mismatch_is_decrypt_failure() {
        let op = fast_operator();
        let key_content = items_key(&op);
        let key_uuid = Uuid::new_v4();
        let encrypted = note_payload(&op, key_uuid, &key_content);

        // Re-home the ciphertext onto a different outer uuid.
        let moved = encrypted.mutated(|p| p.uuid = Uuid::new_v4());
        let result = op.decrypt_item(
            &moved,
            &EncryptionKey::Items {
                uuid: key_uuid,
                content: &key_content,
            },
        );
        assert!(matches!(result, Err(QnError::DecryptFailure { .. })));
    }

    #[test]
    fn test_wrong_items_key_fails() {
        let op = fast_operator();
        let key_content = items_key(&op);
        let other_key = items_key(&op);
        let key_uuid = Uuid::new_v4();
        let encrypted = note_payload(&op, key_uuid, &key_content);

        let result = op.decrypt_item(
            &encrypted,
            &EncryptionKey::Items {
                uuid: key_uuid,
                content: &other_key,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_error_decrypting_payload_never_reencrypted() {
        let op = fast_operator();
        let key_content = items_key(&op);
        let key_uuid = Uuid::new_v4();
        let encrypted = note_payload(&op, key_uuid, &key_content);
        let corrupt = encrypted.mutated(|p| p.error_decrypting = true);

        let out = op
            .encrypt_parameters(
                &corrupt,
                Some(&EncryptionKey::Items {
                    uuid: key_uuid,
                    content: &key_content,
                }),
                crate::operator::PayloadFormat::EncryptedString,
            )
            .unwrap();
        assert_eq!(out, corrupt, "corrupt payloads pass through unchanged");
    }
}
