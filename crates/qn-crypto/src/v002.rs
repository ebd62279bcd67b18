//! Protocol 002: PBKDF2-SHA512 derivation and self-authenticated AES-CBC
//! item strings. Expired 2020-01-01; decrypt-only in practice.
//!
//! Item string format (shared with 003):
//! ```text
//! <ver>:<auth_hash hex>:<uuid>:<iv hex>:<ciphertext base64>
//! auth_hash = HMAC-SHA256 over "<ver>:<uuid>:<iv>:<ciphertext>"
//! ```

use qn_core::{ProtocolVersion, QnError, QnResult};
use qn_model::{ItemContent, ItemsKeyContent, Payload};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::operator::{EncryptedItem, EncryptionKey, ProtocolOperator};
use crate::primitives;
use crate::root_key::{KeyParams, RootKey};
use crate::IV_SIZE;

pub(crate) const MIN_PBKDF2_COST: u32 = 3_000;

// 96 derived bytes: server password / master key / data authentication key.
const DERIVED_LEN: usize = 96;

pub struct V002Operator;

impl ProtocolOperator for V002Operator {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V002
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> QnResult<(RootKey, KeyParams)> {
        let params = KeyParams {
            identifier: Some(identifier.to_string()),
            pw_cost: Some(MIN_PBKDF2_COST),
            pw_salt: Some(primitives::random_hex(16)),
            pw_nonce: None,
            created: None,
            version: ProtocolVersion::V002,
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
        let cost = params.cost()?.max(MIN_PBKDF2_COST);
        let salt = params.salt()?;
        let derived = Zeroizing::new(primitives::pbkdf2_sha512(
            password.as_bytes(),
            salt.as_bytes(),
            cost,
            DERIVED_LEN,
        ));
        Ok(split_derived(&derived, ProtocolVersion::V002))
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
        legacy_encrypt_item(ProtocolVersion::V002, uuid, content, key)
    }

    fn decrypt_item(&self, payload: &Payload, key: &EncryptionKey<'_>) -> QnResult<ItemContent> {
        legacy_decrypt_item(ProtocolVersion::V002, payload, key)
    }
}

/// Slice a 96-byte derivation into master key and data authentication key;
/// the leading third is the server password and never enters the core.
pub(crate) fn split_derived(derived: &[u8], version: ProtocolVersion) -> RootKey {
    let master_key = hex::encode(&derived[32..64]);
    let dak = hex::encode(&derived[64..96]);
    RootKey::new(master_key, Some(dak), version)
}

// ── Shared 002/003 item codec ─────────────────────────────────────────────────

/// A random per-item key in hex; the first half encrypts, the second half
/// authenticates.
pub(crate) fn generate_item_key() -> Zeroizing<String> {
    Zeroizing::new(primitives::random_hex(64))
}

pub(crate) fn split_item_key(item_key_hex: &str) -> QnResult<(&str, &str)> {
    if item_key_hex.len() != 128 {
        return Err(QnError::Other(anyhow::anyhow!(
            "item key must be 128 hex chars, got {}",
            item_key_hex.len()
        )));
    }
    Ok(item_key_hex.split_at(64))
}

pub(crate) fn encrypt_string_cbc(
    version: ProtocolVersion,
    uuid: Uuid,
    encryption_key_hex: &str,
    auth_key_hex: &str,
    plaintext: &[u8],
) -> QnResult<String> {
    let key = primitives::hex_decode(encryption_key_hex)?;
    let auth_key = primitives::hex_decode(auth_key_hex)?;
    let iv = primitives::random_bytes(IV_SIZE);

    let ciphertext = primitives::base64_encode(&primitives::aes_cbc_encrypt(
        &key, &iv, plaintext,
    )?);
    let iv_hex = hex::encode(&iv);

    let string_to_auth = format!("{}:{uuid}:{iv_hex}:{ciphertext}", version.as_str());
    let auth_hash = hex::encode(primitives::hmac_sha256(
        &auth_key,
        string_to_auth.as_bytes(),
    )?);

    Ok(format!(
        "{}:{auth_hash}:{uuid}:{iv_hex}:{ciphertext}",
        version.as_str()
    ))
}

pub(crate) fn decrypt_string_cbc(
    version: ProtocolVersion,
    expected_uuid: Uuid,
    encryption_key_hex: &str,
    auth_key_hex: &str,
    string: &str,
) -> QnResult<Vec<u8>> {
    let fail = || QnError::DecryptFailure {
        uuid: expected_uuid.to_string(),
    };

    let components: Vec<&str> = string.split(':').collect();
    let [ver, auth_hash, uuid, iv_hex, ciphertext_b64] = components[..] else {
        return Err(fail());
    };
    if ver != version.as_str() {
        return Err(fail());
    }
    // Uuid mismatch between the authenticated envelope and the outer payload
    // is a tamper signal.
    if Uuid::parse_str(uuid).ok() != Some(expected_uuid) {
        return Err(fail());
    }

    let auth_key = primitives::hex_decode(auth_key_hex).map_err(|_| fail())?;
    let string_to_auth = format!("{ver}:{uuid}:{iv_hex}:{ciphertext_b64}");
    let tag = primitives::hex_decode(auth_hash).map_err(|_| fail())?;
    if !primitives::hmac_sha256_verify(&auth_key, string_to_auth.as_bytes(), &tag) {
        return Err(fail());
    }

    let key = primitives::hex_decode(encryption_key_hex).map_err(|_| fail())?;
    let iv = primitives::hex_decode(iv_hex).map_err(|_| fail())?;
    let ciphertext = primitives::base64_decode(ciphertext_b64).map_err(|_| fail())?;
    primitives::aes_cbc_decrypt(&key, &iv, &ciphertext).map_err(|_| fail())
}

pub(crate) fn legacy_encrypt_item(
    version: ProtocolVersion,
    uuid: Uuid,
    content: &ItemContent,
    key: &EncryptionKey<'_>,
) -> QnResult<EncryptedItem> {
    let wrap_auth_key = key.auth_key_hex().ok_or_else(|| QnError::KeyMissing {
        operation: format!("authenticate {uuid}"),
    })?;

    let item_key = generate_item_key();
    let (ek, ak) = split_item_key(&item_key)?;

    let plaintext = serde_json::to_vec(content)
        .map_err(|e| QnError::Other(anyhow::anyhow!("content serialization: {e}")))?;
    let content_string = encrypt_string_cbc(version, uuid, ek, ak, &plaintext)?;
    let enc_item_key = encrypt_string_cbc(
        version,
        uuid,
        key.encryption_key_hex(),
        wrap_auth_key,
        item_key.as_bytes(),
    )?;

    Ok(EncryptedItem {
        content: content_string,
        enc_item_key: Some(enc_item_key),
        auth_hash: None,
    })
}

pub(crate) fn legacy_decrypt_item(
    version: ProtocolVersion,
    payload: &Payload,
    key: &EncryptionKey<'_>,
) -> QnResult<ItemContent> {
    let fail = || QnError::DecryptFailure {
        uuid: payload.uuid.to_string(),
    };
    let content_string = payload.encrypted_content().ok_or_else(fail)?;
    let enc_item_key = payload.enc_item_key.as_deref().ok_or_else(fail)?;
    let wrap_auth_key = key.auth_key_hex().ok_or_else(fail)?;

    let item_key_bytes = Zeroizing::new(decrypt_string_cbc(
        version,
        payload.uuid,
        key.encryption_key_hex(),
        wrap_auth_key,
        enc_item_key,
    )?);
    let item_key_hex = std::str::from_utf8(&item_key_bytes).map_err(|_| fail())?;
    let (ek, ak) = split_item_key(item_key_hex)?;

    let plaintext = decrypt_string_cbc(version, payload.uuid, ek, ak, content_string)?;
    serde_json::from_slice(&plaintext).map_err(|_| fail())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::PayloadFormat;
    use qn_core::ContentType;
    use serde_json::json;

    fn root_key(op: &V002Operator) -> (RootKey, KeyParams) {
        op.create_root_key("a@b.c", "password").unwrap()
    }

    fn encrypted_note(op: &V002Operator, root: &RootKey) -> Payload {
        let mut content = ItemContent::new();
        content.set_extra("title", json!("legacy"));
        let payload = Payload::new_decrypted(ContentType::Note, content);
        op.encrypt_parameters(
            &payload,
            Some(&EncryptionKey::Root(root)),
            PayloadFormat::EncryptedString,
        )
        .unwrap()
    }

    #[test]
    fn test_derive_shape() {
        let op = V002Operator;
        let (key, params) = root_key(&op);
        assert_eq!(key.version(), ProtocolVersion::V002);
        assert_eq!(key.master_key_hex().len(), 64);
        assert_eq!(key.data_authentication_key_hex().unwrap().len(), 64);
        assert_eq!(params.pw_cost, Some(MIN_PBKDF2_COST));

        let again = op.derive_root_key("a@b.c", "password", &params).unwrap();
        assert!(key.matches(&again));
    }

    #[test]
    fn test_item_roundtrip() {
        let op = V002Operator;
        let (root, _) = root_key(&op);
        let encrypted = encrypted_note(&op, &root);

        assert!(encrypted.encrypted_content().unwrap().starts_with("002:"));
        assert_eq!(
            encrypted.encrypted_content().unwrap().split(':').count(),
            5
        );

        let decrypted = op
            .decrypt_item(&encrypted, &EncryptionKey::Root(&root))
            .unwrap();
        assert_eq!(decrypted.get_extra_str("title"), Some("legacy"));
    }

    #[test]
    fn test_tampered_auth_hash_fails() {
        let op = V002Operator;
        let (root, _) = root_key(&op);
        let encrypted = encrypted_note(&op, &root);

        let mut parts: Vec<String> = encrypted
            .encrypted_content()
            .unwrap()
            .split(':')
            .map(str::to_string)
            .collect();
        parts[1] = parts[1].replace(|c: char| c.is_ascii_hexdigit(), "0");
        let tampered = encrypted.mutated(|p| {
            p.content = Some(qn_model::PayloadContent::Encrypted(parts.join(":")));
        });

        assert!(op
            .decrypt_item(&tampered, &EncryptionKey::Root(&root))
            .is_err());
    }

    #[test]
    fn test_uuid_swap_fails() {
        let op = V002Operator;
        let (root, _) = root_key(&op);
        let encrypted = encrypted_note(&op, &root);
        let moved = encrypted.mutated(|p| p.uuid = Uuid::new_v4());
        assert!(matches!(
            op.decrypt_item(&moved, &EncryptionKey::Root(&root)),
            Err(QnError::DecryptFailure { .. })
        ));
    }

    #[test]
    fn test_wrong_root_key_fails() {
        let op = V002Operator;
        let (root, _) = root_key(&op);
        let (other, _) = op.create_root_key("a@b.c", "other password").unwrap();
        let encrypted = encrypted_note(&op, &root);
        assert!(op
            .decrypt_item(&encrypted, &EncryptionKey::Root(&other))
            .is_err());
    }
}
