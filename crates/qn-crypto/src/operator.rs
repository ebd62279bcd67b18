//! The operator seam: one implementation per protocol version.

use qn_core::{ProtocolVersion, QnError, QnResult};
use qn_model::{ItemContent, ItemsKeyContent, Payload, PayloadContent};
use uuid::Uuid;

use crate::primitives;
use crate::root_key::{KeyParams, RootKey};

/// Decrypted-string version prefix for unencrypted-but-encoded payloads.
pub const BASE64_DECRYPTED_PREFIX: &str = "000";

/// Output form a payload copy is encoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    DecryptedBareObject,
    DecryptedBase64String,
    EncryptedString,
}

/// The key an item operation runs under: the root key for root-encrypted
/// content types, an items key for everything else.
#[derive(Debug, Clone, Copy)]
pub enum EncryptionKey<'a> {
    Root(&'a RootKey),
    Items {
        uuid: Uuid,
        content: &'a ItemsKeyContent,
    },
}

impl<'a> EncryptionKey<'a> {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            EncryptionKey::Root(key) => key.version(),
            EncryptionKey::Items { content, .. } => content.version,
        }
    }

    /// Hex of the key material that wraps the per-item key.
    pub fn encryption_key_hex(&self) -> &'a str {
        match self {
            EncryptionKey::Root(key) => key.master_key_hex(),
            EncryptionKey::Items { content, .. } => &content.items_key,
        }
    }

    /// Hex of the HMAC key for versions ≤ 003.
    pub fn auth_key_hex(&self) -> Option<&'a str> {
        match self {
            EncryptionKey::Root(key) => key.data_authentication_key_hex(),
            EncryptionKey::Items { content, .. } => content.data_authentication_key.as_deref(),
        }
    }

    /// Uuid stamped into `items_key_id` when encrypting under an items key.
    pub fn items_key_id(&self) -> Option<Uuid> {
        match self {
            EncryptionKey::Root(_) => None,
            EncryptionKey::Items { uuid, .. } => Some(*uuid),
        }
    }
}

/// Result of encrypting one item's content.
#[derive(Debug, Clone)]
pub struct EncryptedItem {
    pub content: String,
    pub enc_item_key: Option<String>,
    /// Separate authentication hash; 001 only.
    pub auth_hash: Option<String>,
}

/// Per-version crypto of items and root-key derivation.
pub trait ProtocolOperator {
    fn version(&self) -> ProtocolVersion;

    /// Generate a fresh root key and the params needed to re-derive it.
    fn create_root_key(&self, identifier: &str, password: &str) -> QnResult<(RootKey, KeyParams)>;

    /// Re-derive a root key from credentials and stored params.
    fn derive_root_key(
        &self,
        identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> QnResult<RootKey>;

    /// Items-key content for this version. Versions ≤ 003 mirror the root
    /// key material (no cryptographic separation exists there); 004 returns
    /// fresh random material.
    fn create_items_key_content(&self, root_key: &RootKey) -> ItemsKeyContent;

    fn encrypt_item(
        &self,
        uuid: Uuid,
        content: &ItemContent,
        key: &EncryptionKey<'_>,
    ) -> QnResult<EncryptedItem>;

    fn decrypt_item(&self, payload: &Payload, key: &EncryptionKey<'_>) -> QnResult<ItemContent>;

    /// Apply the format mapping: bare object, 000-prefixed base64, or this
    /// operator's encrypted string. Returns a payload copy carrying the new
    /// encryption parameters. An `error_decrypting` payload is returned
    /// unchanged so possibly corrupt ciphertext is never re-encrypted.
    fn encrypt_parameters(
        &self,
        payload: &Payload,
        key: Option<&EncryptionKey<'_>>,
        format: PayloadFormat,
    ) -> QnResult<Payload> {
        if payload.error_decrypting {
            return Ok(payload.clone());
        }
        // Tombstones and payloads still awaiting decryption carry no
        // decrypted content; they pass through as-is.
        let Some(content) = payload.decrypted_content() else {
            return Ok(payload.clone());
        };

        let mut out = payload.clone();
        match format {
            PayloadFormat::DecryptedBareObject => {
                out.content = Some(PayloadContent::Decrypted(content.clone()));
            }
            PayloadFormat::DecryptedBase64String => {
                out.content = Some(PayloadContent::Encrypted(encode_base64_decrypted(content)?));
                out.enc_item_key = None;
                out.auth_hash = None;
            }
            PayloadFormat::EncryptedString => {
                let key = key.ok_or_else(|| QnError::KeyMissing {
                    operation: format!("encrypt {}", payload.uuid),
                })?;
                let encrypted = self.encrypt_item(payload.uuid, content, key)?;
                out.content = Some(PayloadContent::Encrypted(encrypted.content));
                out.enc_item_key = encrypted.enc_item_key;
                out.auth_hash = encrypted.auth_hash;
                out.items_key_id = key.items_key_id();
            }
        }
        Ok(out)
    }
}

/// `000` + base64 of the content JSON.
pub fn encode_base64_decrypted(content: &ItemContent) -> QnResult<String> {
    let json = serde_json::to_vec(content)
        .map_err(|e| QnError::Other(anyhow::anyhow!("content serialization: {e}")))?;
    Ok(format!(
        "{BASE64_DECRYPTED_PREFIX}{}",
        primitives::base64_encode(&json)
    ))
}

pub fn decode_base64_decrypted(s: &str) -> QnResult<ItemContent> {
    let encoded = s
        .strip_prefix(BASE64_DECRYPTED_PREFIX)
        .ok_or_else(|| QnError::Other(anyhow::anyhow!("missing 000 prefix")))?;
    let bytes = primitives::base64_decode(encoded)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| QnError::Other(anyhow::anyhow!("content deserialization: {e}")))
}

/// Whether a ciphertext string claims a version beyond this library.
pub fn is_version_newer_than_library(content: &str) -> bool {
    if ProtocolVersion::from_prefix(content).is_some() {
        return false;
    }
    content
        .get(0..3)
        .and_then(|p| p.parse::<u32>().ok())
        .map(|n| n > 4)
        .unwrap_or(false)
}
