//! Storage façade: wrapped, unwrapped, and nonwrapped value domains over the
//! host key-value store.
//!
//! The unwrapped map is the decrypted in-memory mirror of the wrapped
//! domain; the nonwrapped domain (key params, the wrapped root key) is
//! always plaintext. Value access outside the launched state is a contract
//! error; persistence becomes legal only after the `Launched` stage.

use qn_core::device::KeyValueStore;
use qn_core::{QnError, QnResult};
use qn_model::{ItemContent, Payload, PayloadFieldSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

const STORAGE_OBJECT_KEY: &str = "storage_object";
const ITEM_ROW_PREFIX: &str = "item";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePersistencePolicy {
    Default,
    /// Clears disk immediately and skips all future persistence.
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEncryptionPolicy {
    Default,
    Disabled,
}

/// Which domain a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageValueMode {
    /// Encrypted at rest when a key and the default encryption policy exist.
    Wrapped,
    /// Always plaintext on disk.
    Nonwrapped,
}

/// On-disk shape of the storage object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageObjectOnDisk {
    #[serde(default)]
    nonwrapped: Map<String, Value>,
    /// Wrapped domain as an encrypted-storage payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wrapped_encrypted: Option<Payload>,
    /// Wrapped domain in plaintext (no key, or encryption disabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wrapped_plain: Option<Map<String, Value>>,
}

pub struct StorageFacade {
    kv: Box<dyn KeyValueStore>,
    namespace: String,
    unwrapped: Map<String, Value>,
    nonwrapped: Map<String, Value>,
    /// Encrypted storage payload awaiting (or surviving) decryption; kept
    /// around so wrapping-key validation can test against it.
    encrypted_wrapped: Option<Payload>,
    persistence: StoragePersistencePolicy,
    encryption: StorageEncryptionPolicy,
    launched: bool,
}

impl StorageFacade {
    /// Open the façade and load the persisted storage object. Value access
    /// stays illegal until `set_launched`.
    pub fn open(kv: Box<dyn KeyValueStore>, namespace: impl Into<String>) -> QnResult<Self> {
        let namespace = namespace.into();
        let mut facade = Self {
            kv,
            namespace,
            unwrapped: Map::new(),
            nonwrapped: Map::new(),
            encrypted_wrapped: None,
            persistence: StoragePersistencePolicy::Default,
            encryption: StorageEncryptionPolicy::Default,
            launched: false,
        };
        facade.load()?;
        Ok(facade)
    }

    fn disk_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn load(&mut self) -> QnResult<()> {
        let Some(raw) = self.kv.get(&self.disk_key(STORAGE_OBJECT_KEY))? else {
            return Ok(());
        };
        let object: StorageObjectOnDisk = serde_json::from_str(&raw)
            .map_err(|e| QnError::StorageReadError(format!("storage object: {e}")))?;
        self.nonwrapped = object.nonwrapped;
        if let Some(plain) = object.wrapped_plain {
            self.unwrapped = plain;
        }
        self.encrypted_wrapped = object.wrapped_encrypted;
        Ok(())
    }

    /// Whether the wrapped domain is still ciphertext and needs the root key.
    pub fn needs_decrypt(&self) -> bool {
        self.encrypted_wrapped.is_some() && self.unwrapped.is_empty()
    }

    /// The at-rest encrypted storage payload, for wrapping-key validation.
    pub fn encrypted_wrapped_payload(&self) -> Option<&Payload> {
        self.encrypted_wrapped.as_ref()
    }

    /// Install the decrypted mirror of the wrapped domain (the caller
    /// decrypted `encrypted_wrapped_payload` through the protocol service).
    pub fn install_unwrapped(&mut self, content: &ItemContent) {
        self.unwrapped = content.extra.clone();
    }

    pub fn set_launched(&mut self) {
        self.launched = true;
    }

    pub fn set_persistence_policy(&mut self, policy: StoragePersistencePolicy) -> QnResult<()> {
        self.persistence = policy;
        if policy == StoragePersistencePolicy::Ephemeral {
            self.clear_disk()?;
        }
        Ok(())
    }

    pub fn set_encryption_policy(&mut self, policy: StorageEncryptionPolicy) {
        self.encryption = policy;
    }

    pub fn encryption_policy(&self) -> StorageEncryptionPolicy {
        self.encryption
    }

    fn ensure_launched(&self) -> QnResult<()> {
        if self.launched {
            Ok(())
        } else {
            Err(QnError::StorageReadError(
                "storage accessed before launch".into(),
            ))
        }
    }

    // ── Value domains ─────────────────────────────────────────────────────────

    pub fn set_value(&mut self, key: &str, value: Value, mode: StorageValueMode) -> QnResult<()> {
        self.ensure_launched()?;
        match mode {
            StorageValueMode::Wrapped => self.unwrapped.insert(key.to_string(), value),
            StorageValueMode::Nonwrapped => self.nonwrapped.insert(key.to_string(), value),
        };
        Ok(())
    }

    pub fn get_value(&self, key: &str, mode: StorageValueMode) -> QnResult<Option<Value>> {
        self.ensure_launched()?;
        Ok(self.peek_value(key, mode))
    }

    /// Pre-launch read used by the key manager while computing the key mode;
    /// not part of the public value API.
    pub(crate) fn peek_value(&self, key: &str, mode: StorageValueMode) -> Option<Value> {
        match mode {
            StorageValueMode::Wrapped => self.unwrapped.get(key).cloned(),
            StorageValueMode::Nonwrapped => self.nonwrapped.get(key).cloned(),
        }
    }

    pub(crate) fn poke_value(&mut self, key: &str, value: Value, mode: StorageValueMode) {
        match mode {
            StorageValueMode::Wrapped => self.unwrapped.insert(key.to_string(), value),
            StorageValueMode::Nonwrapped => self.nonwrapped.insert(key.to_string(), value),
        };
    }

    pub fn remove_value(&mut self, key: &str, mode: StorageValueMode) -> QnResult<()> {
        self.ensure_launched()?;
        self.purge_value(key, mode);
        Ok(())
    }

    pub(crate) fn purge_value(&mut self, key: &str, mode: StorageValueMode) {
        match mode {
            StorageValueMode::Wrapped => self.unwrapped.remove(key),
            StorageValueMode::Nonwrapped => self.nonwrapped.remove(key),
        };
    }

    /// Wrapped-domain snapshot as item content, for encryption at persist.
    pub fn unwrapped_as_content(&self) -> ItemContent {
        let mut content = ItemContent::new();
        content.extra = self.unwrapped.clone();
        content
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Persist the storage object. `wrapped_encrypted` is the wrapped domain
    /// already encrypted by the protocol service, or `None` to store it
    /// plaintext (no key, or encryption disabled).
    pub fn persist_storage_object(
        &mut self,
        wrapped_encrypted: Option<Payload>,
    ) -> QnResult<()> {
        if self.persistence == StoragePersistencePolicy::Ephemeral {
            return Ok(());
        }
        self.ensure_launched()?;

        let object = match wrapped_encrypted {
            Some(payload) => {
                self.encrypted_wrapped = Some(payload.clone());
                StorageObjectOnDisk {
                    nonwrapped: self.nonwrapped.clone(),
                    wrapped_encrypted: Some(payload),
                    wrapped_plain: None,
                }
            }
            None => StorageObjectOnDisk {
                nonwrapped: self.nonwrapped.clone(),
                wrapped_encrypted: None,
                wrapped_plain: Some(self.unwrapped.clone()),
            },
        };
        let raw = serde_json::to_string(&object)
            .map_err(|e| QnError::StorageWriteError(format!("storage object: {e}")))?;
        self.kv.set(&self.disk_key(STORAGE_OBJECT_KEY), &raw)?;
        debug!(namespace = %self.namespace, "persisted storage object");
        Ok(())
    }

    // ── Item payload rows ─────────────────────────────────────────────────────

    pub fn save_payload_rows(&mut self, payloads: &[Payload]) -> QnResult<()> {
        if self.persistence == StoragePersistencePolicy::Ephemeral {
            return Ok(());
        }
        self.ensure_launched()?;
        for payload in payloads {
            let row = payload.project(PayloadFieldSet::Storage);
            let raw = serde_json::to_string(&row)
                .map_err(|e| QnError::StorageWriteError(format!("payload row: {e}")))?;
            self.kv
                .set(&self.disk_key(&format!("{ITEM_ROW_PREFIX}:{}", payload.uuid)), &raw)?;
        }
        Ok(())
    }

    pub fn delete_payload_row(&mut self, uuid: Uuid) -> QnResult<()> {
        self.kv
            .remove(&self.disk_key(&format!("{ITEM_ROW_PREFIX}:{uuid}")))
    }

    pub fn load_payload_rows(&self) -> QnResult<Vec<Payload>> {
        let prefix = self.disk_key(&format!("{ITEM_ROW_PREFIX}:"));
        let mut rows = Vec::new();
        for key in self.kv.keys()? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(raw) = self.kv.get(&key)? else {
                continue;
            };
            let payload: Payload = serde_json::from_str(&raw)
                .map_err(|e| QnError::StorageReadError(format!("payload row {key}: {e}")))?;
            rows.push(payload);
        }
        rows.sort_by_key(|p| p.uuid);
        Ok(rows)
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    pub fn clear_disk(&mut self) -> QnResult<()> {
        self.kv.clear()
    }

    /// Sign-out wipe: memory domains, encrypted mirror, and disk.
    pub fn wipe(&mut self) -> QnResult<()> {
        self.unwrapped.clear();
        self.nonwrapped.clear();
        self.encrypted_wrapped = None;
        self.clear_disk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qn_core::device::MemoryKeyValueStore;
    use qn_core::ContentType;
    use serde_json::json;

    fn launched_facade() -> StorageFacade {
        let mut facade =
            StorageFacade::open(Box::new(MemoryKeyValueStore::new()), "test").unwrap();
        facade.set_launched();
        facade
    }

    #[test]
    fn test_access_before_launch_is_error() {
        let facade = StorageFacade::open(Box::new(MemoryKeyValueStore::new()), "test").unwrap();
        assert!(facade
            .get_value("k", StorageValueMode::Nonwrapped)
            .is_err());
    }

    #[test]
    fn test_value_domains_are_separate() {
        let mut facade = launched_facade();
        facade
            .set_value("k", json!(1), StorageValueMode::Wrapped)
            .unwrap();
        facade
            .set_value("k", json!(2), StorageValueMode::Nonwrapped)
            .unwrap();
        assert_eq!(
            facade.get_value("k", StorageValueMode::Wrapped).unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            facade.get_value("k", StorageValueMode::Nonwrapped).unwrap(),
            Some(json!(2))
        );
    }

    #[test]
    fn test_plaintext_persist_and_reload() {
        let mut facade = launched_facade();
        facade
            .set_value("wrapped_key", json!("w"), StorageValueMode::Wrapped)
            .unwrap();
        facade
            .set_value("plain_key", json!("p"), StorageValueMode::Nonwrapped)
            .unwrap();
        facade.persist_storage_object(None).unwrap();

        // Reuse the backing store through a fresh facade.
        let raw = facade
            .kv
            .get(&facade.disk_key(STORAGE_OBJECT_KEY))
            .unwrap()
            .unwrap();
        let mut kv = MemoryKeyValueStore::new();
        kv.set("test:storage_object", &raw).unwrap();
        let mut reloaded = StorageFacade::open(Box::new(kv), "test").unwrap();
        reloaded.set_launched();

        assert_eq!(
            reloaded.get_value("wrapped_key", StorageValueMode::Wrapped).unwrap(),
            Some(json!("w"))
        );
        assert_eq!(
            reloaded.get_value("plain_key", StorageValueMode::Nonwrapped).unwrap(),
            Some(json!("p"))
        );
        assert!(!reloaded.needs_decrypt());
    }

    #[test]
    fn test_ephemeral_clears_and_skips_disk() {
        let mut facade = launched_facade();
        facade
            .set_value("k", json!(1), StorageValueMode::Nonwrapped)
            .unwrap();
        facade.persist_storage_object(None).unwrap();
        facade
            .set_persistence_policy(StoragePersistencePolicy::Ephemeral)
            .unwrap();
        assert!(facade.kv.keys().unwrap().is_empty(), "disk cleared immediately");

        facade.persist_storage_object(None).unwrap();
        assert!(facade.kv.keys().unwrap().is_empty(), "persistence skipped");
        // In-memory value survives.
        assert_eq!(
            facade.get_value("k", StorageValueMode::Nonwrapped).unwrap(),
            Some(json!(1))
        );
    }

    #[test]
    fn test_payload_rows_roundtrip() {
        let mut facade = launched_facade();
        let payload = Payload::new_decrypted(ContentType::Note, ItemContent::new());
        facade.save_payload_rows(&[payload.clone()]).unwrap();

        let rows = facade.load_payload_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uuid, payload.uuid);

        facade.delete_payload_row(payload.uuid).unwrap();
        assert!(facade.load_payload_rows().unwrap().is_empty());
    }

    #[test]
    fn test_wipe() {
        let mut facade = launched_facade();
        facade
            .set_value("k", json!(1), StorageValueMode::Wrapped)
            .unwrap();
        facade.persist_storage_object(None).unwrap();
        facade.wipe().unwrap();
        assert_eq!(
            facade.get_value("k", StorageValueMode::Wrapped).unwrap(),
            None
        );
        assert!(facade.kv.keys().unwrap().is_empty());
    }
}
