//! The protocol service: operator dispatch, intent→format mapping, key
//! selection, and batch encrypt/decrypt.
//!
//! Batch decrypt never aborts: every failure is caught per payload and
//! recorded in the payload's flags, so undecryptable items stay in the
//! collection and can be retried when keys arrive.

use qn_core::config::QnConfig;
use qn_core::device::Keychain;
use qn_core::time::now_ms;
use qn_core::{ContentType, ProtocolVersion, QnError, QnResult};
use qn_crypto::operator::{decode_base64_decrypted, is_version_newer_than_library};
use qn_crypto::{
    EncryptionKey, KeyParams, OperatorRegistry, PayloadFormat, RootKey,
};
use qn_model::{ItemContent, ItemStore, ItemsKeyContent, Payload, PayloadContent};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::intent::EncryptionIntent;
use crate::items_keys;
use crate::key_manager::KeyManager;

/// Resolved key choice for one payload operation.
enum KeyChoice {
    Root(RootKey),
    Items(Uuid, ItemsKeyContent),
    None,
}

impl KeyChoice {
    fn version(&self) -> Option<ProtocolVersion> {
        match self {
            KeyChoice::Root(key) => Some(key.version()),
            KeyChoice::Items(_, content) => Some(content.version),
            KeyChoice::None => None,
        }
    }

    fn as_encryption_key(&self) -> Option<EncryptionKey<'_>> {
        match self {
            KeyChoice::Root(key) => Some(EncryptionKey::Root(key)),
            KeyChoice::Items(uuid, content) => Some(EncryptionKey::Items {
                uuid: *uuid,
                content,
            }),
            KeyChoice::None => None,
        }
    }
}

pub struct ProtocolService {
    registry: OperatorRegistry,
    key_manager: KeyManager,
}

impl ProtocolService {
    pub fn new(config: &QnConfig, keychain: Box<dyn Keychain>) -> Self {
        Self {
            registry: OperatorRegistry::new(config.crypto.clone()),
            key_manager: KeyManager::new(keychain),
        }
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.key_manager
    }

    pub fn key_manager_mut(&mut self) -> &mut KeyManager {
        &mut self.key_manager
    }

    pub fn registry_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.registry
    }

    /// Split borrow for callers that drive the key manager with the
    /// registry in hand.
    pub fn parts_mut(&mut self) -> (&mut OperatorRegistry, &mut KeyManager) {
        (&mut self.registry, &mut self.key_manager)
    }

    // ── Root key derivation ───────────────────────────────────────────────────

    pub fn create_root_key(
        &mut self,
        identifier: &str,
        password: &str,
        version: ProtocolVersion,
    ) -> QnResult<(RootKey, KeyParams)> {
        self.registry
            .operator_for(version)?
            .create_root_key(identifier, password)
    }

    pub fn derive_root_key(
        &mut self,
        identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> QnResult<RootKey> {
        self.registry
            .operator_for(params.version)?
            .derive_root_key(identifier, password, params)
    }

    // ── Key selection ─────────────────────────────────────────────────────────

    fn key_for_encrypt(&self, payload: &Payload, store: &ItemStore) -> KeyChoice {
        if payload.content_type.is_root_key_encrypted()
            || payload.content_type == ContentType::RootKey
        {
            return self
                .key_manager
                .root_key()
                .cloned()
                .map(KeyChoice::Root)
                .unwrap_or(KeyChoice::None);
        }
        items_keys::default_items_key(store)
            .map(|(uuid, content)| KeyChoice::Items(uuid, content))
            .unwrap_or(KeyChoice::None)
    }

    fn key_for_decrypt(
        &self,
        payload: &Payload,
        version: ProtocolVersion,
        store: &ItemStore,
    ) -> KeyChoice {
        if payload.content_type.is_root_key_encrypted()
            || payload.content_type == ContentType::RootKey
        {
            return self
                .key_manager
                .root_key()
                .cloned()
                .map(KeyChoice::Root)
                .unwrap_or(KeyChoice::None);
        }
        if payload.items_key_id.is_some() {
            return items_keys::items_key_for_payload(store, payload)
                .map(|(uuid, content)| KeyChoice::Items(uuid, content))
                .unwrap_or(KeyChoice::None);
        }
        if version.uses_root_key_for_items() {
            // Payloads predating items keys derive everything from the root
            // key; after an upgrade the mirrored legacy items key stands in.
            if let Some(root) = self
                .key_manager
                .root_key()
                .filter(|key| key.version() == version)
            {
                return KeyChoice::Root(root.clone());
            }
            return items_keys::any_items_key_for_version(store, version)
                .map(|(uuid, content)| KeyChoice::Items(uuid, content))
                .unwrap_or(KeyChoice::None);
        }
        items_keys::default_items_key_for_version(store, version)
            .map(|(uuid, content)| KeyChoice::Items(uuid, content))
            .unwrap_or(KeyChoice::None)
    }

    // ── Encryption ────────────────────────────────────────────────────────────

    pub fn encrypt_payload(
        &mut self,
        payload: &Payload,
        intent: EncryptionIntent,
        store: &ItemStore,
    ) -> QnResult<Payload> {
        let choice = self.key_for_encrypt(payload, store);
        let format = intent.format(!matches!(choice, KeyChoice::None))?;

        let version = match format {
            PayloadFormat::EncryptedString => {
                let version = choice.version().ok_or_else(|| QnError::KeyMissing {
                    operation: format!("encrypt {}", payload.uuid),
                })?;
                if version.is_expired(now_ms()) {
                    return Err(QnError::VersionOutdated(version.to_string()));
                }
                version
            }
            _ => qn_core::version::LIBRARY_VERSION,
        };

        let operator = self.registry.operator_for(version)?;
        operator.encrypt_parameters(payload, choice.as_encryption_key().as_ref(), format)
    }

    pub fn encrypt_payloads(
        &mut self,
        payloads: &[Payload],
        intent: EncryptionIntent,
        store: &ItemStore,
    ) -> QnResult<Vec<Payload>> {
        payloads
            .iter()
            .map(|payload| self.encrypt_payload(payload, intent, store))
            .collect()
    }

    // ── Decryption ────────────────────────────────────────────────────────────

    /// Decrypt a batch; each failure is isolated to its payload.
    pub fn decrypt_payloads(&mut self, payloads: &[Payload], store: &ItemStore) -> Vec<Payload> {
        payloads
            .iter()
            .map(|payload| self.decrypt_payload(payload, store))
            .collect()
    }

    pub fn decrypt_payload(&mut self, payload: &Payload, store: &ItemStore) -> Payload {
        // Deleted tombstones with no content pass through.
        let Some(content) = &payload.content else {
            return payload.clone();
        };
        // Non-string content is already decrypted.
        let PayloadContent::Encrypted(string) = content else {
            return payload.clone();
        };

        if string.starts_with("000") {
            return match decode_base64_decrypted(string) {
                Ok(item_content) => decrypted_ok(payload, item_content),
                Err(_) => decrypt_failed(payload, false),
            };
        }

        if is_version_newer_than_library(string) {
            warn!(uuid = %payload.uuid, "payload version newer than library");
            return decrypt_failed(payload, false);
        }

        let Some(version) = ProtocolVersion::from_prefix(string) else {
            return decrypt_failed(payload, false);
        };

        let choice = self.key_for_decrypt(payload, version, store);
        let Some(key) = choice.as_encryption_key() else {
            // Key not present yet; leave content untouched and flag so a
            // retry happens when keys arrive.
            debug!(uuid = %payload.uuid, "no key available for decrypt");
            return decrypt_failed(payload, true);
        };

        let operator = match self.registry.operator_for(version) {
            Ok(op) => op,
            Err(_) => return decrypt_failed(payload, false),
        };
        match operator.decrypt_item(payload, &key) {
            Ok(item_content) => decrypted_ok(payload, item_content),
            Err(e) => {
                debug!(uuid = %payload.uuid, error = %e, "decrypt failed");
                decrypt_failed(payload, false)
            }
        }
    }

    // ── Storage payload helpers ───────────────────────────────────────────────

    /// Encrypt the wrapped storage domain under the root key, or return
    /// `None` when no root key exists (plaintext storage).
    pub fn encrypt_storage_content(
        &mut self,
        content: ItemContent,
    ) -> QnResult<Option<Payload>> {
        let Some(root) = self.key_manager.root_key().cloned() else {
            return Ok(None);
        };
        let payload = Payload::new_decrypted(ContentType::EncryptedStorage, content);
        let operator = self.registry.operator_for(root.version())?;
        let encrypted = operator.encrypt_parameters(
            &payload,
            Some(&EncryptionKey::Root(&root)),
            PayloadFormat::EncryptedString,
        )?;
        Ok(Some(encrypted))
    }

    /// Decrypt a root-key-encrypted payload (wrapped storage, wrapped root
    /// key).
    pub fn decrypt_root_payload(&mut self, payload: &Payload) -> QnResult<ItemContent> {
        let root = self
            .key_manager
            .root_key()
            .cloned()
            .ok_or_else(|| QnError::KeyMissing {
                operation: format!("decrypt {}", payload.uuid),
            })?;
        let version = payload
            .content_version()
            .ok_or_else(|| QnError::DecryptFailure {
                uuid: payload.uuid.to_string(),
            })?;
        let operator = self.registry.operator_for(version)?;
        operator.decrypt_item(payload, &EncryptionKey::Root(&root))
    }
}

fn decrypted_ok(payload: &Payload, content: ItemContent) -> Payload {
    payload.mutated(|p| {
        p.error_decrypting_changed = p.error_decrypting;
        p.error_decrypting = false;
        p.waiting_for_key = false;
        p.content = Some(PayloadContent::Decrypted(content));
    })
}

fn decrypt_failed(payload: &Payload, waiting: bool) -> Payload {
    payload.mutated(|p| {
        p.error_decrypting_changed = !p.error_decrypting;
        p.error_decrypting = true;
        p.waiting_for_key = waiting;
    })
}
