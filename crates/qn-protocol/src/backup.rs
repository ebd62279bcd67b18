//! Backup file codec: creation and tolerant ingestion.
//!
//! File shape: `{ keyParams, items }` where items are encrypted payloads, or
//! decrypted payloads for plaintext backups. The legacy `auth_params` field
//! name is accepted as an alias for `keyParams`. Single-item failures never
//! abort an import; failures are discarded and counted.

use std::collections::HashMap;

use qn_core::time::now_ms;
use qn_core::{ContentType, QnError, QnResult};
use qn_crypto::operator::decode_base64_decrypted;
use qn_crypto::{EncryptionKey, KeyParams, RootKey};
use qn_model::{
    ItemContent, ItemStore, ItemsKeyContent, Payload, PayloadContent, PayloadFieldSet,
    PayloadSource,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::intent::EncryptionIntent;
use crate::service::ProtocolService;

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(
        rename = "keyParams",
        alias = "auth_params",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_params: Option<KeyParams>,
    pub items: Vec<Payload>,
}

/// Result of a tolerant import: the items that made it in, and how many
/// failed to decrypt.
#[derive(Debug)]
pub struct ImportResult {
    pub affected: Vec<Uuid>,
    pub errored: usize,
}

/// Produce a backup of every non-deleted, syncable item under the given
/// file intent.
pub fn create_backup(
    service: &mut ProtocolService,
    store: &ItemStore,
    intent: EncryptionIntent,
    account_key_params: Option<KeyParams>,
) -> QnResult<BackupFile> {
    let mut items = Vec::new();
    for item in store.items() {
        let payload = item.payload();
        if payload.deleted || payload.dummy || payload.content_type.is_local_only() {
            continue;
        }
        if payload.error_decrypting {
            // Corrupt ciphertext goes into the file verbatim; the user may
            // recover it with a key we never saw.
            items.push(payload.project(PayloadFieldSet::File));
            continue;
        }
        let encrypted = service.encrypt_payload(payload, intent, store)?;
        items.push(encrypted.project(PayloadFieldSet::File));
    }

    let key_params = match intent {
        EncryptionIntent::FileDecrypted => None,
        _ => account_key_params,
    };
    Ok(BackupFile { key_params, items })
}

/// Import a backup file. Encrypted backups derive a root key from the file's
/// key params and the supplied password; items keys inside the file decrypt
/// first, then everything else. Successes are applied dirty so the next sync
/// uploads them.
pub fn import_backup(
    service: &mut ProtocolService,
    store: &mut ItemStore,
    file: &BackupFile,
    password: Option<&str>,
) -> QnResult<ImportResult> {
    let backup_root = match &file.key_params {
        Some(params) => {
            let password = password.ok_or_else(|| QnError::KeyMissing {
                operation: "derive backup key".into(),
            })?;
            let identifier = params.identifier.clone().unwrap_or_default();
            Some(service.derive_root_key(&identifier, password, params)?)
        }
        None => None,
    };

    let mut errored = 0usize;
    let mut decrypted: Vec<Payload> = Vec::new();

    // Items keys first; everything else may depend on them.
    let mut backup_items_keys: HashMap<Uuid, ItemsKeyContent> = HashMap::new();
    for payload in &file.items {
        if payload.content_type != ContentType::ItemsKey {
            continue;
        }
        match decrypt_backup_payload(service, payload, backup_root.as_ref(), &backup_items_keys) {
            Ok(content) => {
                if let Ok(key_content) = serde_json::from_value::<ItemsKeyContent>(
                    serde_json::Value::Object(content.extra.clone()),
                ) {
                    backup_items_keys.insert(payload.uuid, key_content);
                }
                decrypted.push(restore_payload(payload, content));
            }
            Err(e) => {
                warn!(uuid = %payload.uuid, error = %e, "backup items key failed to decrypt");
                errored += 1;
            }
        }
    }

    for payload in &file.items {
        if payload.content_type == ContentType::ItemsKey {
            continue;
        }
        match decrypt_backup_payload(service, payload, backup_root.as_ref(), &backup_items_keys) {
            Ok(content) => decrypted.push(restore_payload(payload, content)),
            Err(e) => {
                debug!(uuid = %payload.uuid, error = %e, "backup item failed to decrypt");
                errored += 1;
            }
        }
    }

    let affected: Vec<Uuid> = decrypted.iter().map(|p| p.uuid).collect();
    store.apply(decrypted, PayloadSource::FileImport);
    if errored > 0 {
        warn!(errored, imported = affected.len(), "backup import finished with failures");
    }
    Ok(ImportResult { affected, errored })
}

fn decrypt_backup_payload(
    service: &mut ProtocolService,
    payload: &Payload,
    backup_root: Option<&RootKey>,
    backup_items_keys: &HashMap<Uuid, ItemsKeyContent>,
) -> QnResult<ItemContent> {
    let fail = || QnError::DecryptFailure {
        uuid: payload.uuid.to_string(),
    };
    match &payload.content {
        None => Err(fail()),
        Some(PayloadContent::Decrypted(content)) => Ok(content.clone()),
        Some(PayloadContent::Encrypted(string)) if string.starts_with("000") => {
            decode_base64_decrypted(string)
        }
        Some(PayloadContent::Encrypted(string)) => {
            let version = qn_core::ProtocolVersion::from_prefix(string).ok_or_else(fail)?;
            let key = select_backup_key(payload, version, backup_root, backup_items_keys)
                .ok_or_else(|| QnError::KeyMissing {
                    operation: format!("decrypt backup item {}", payload.uuid),
                })?;
            let operator = service.registry_mut().operator_for(version)?;
            operator.decrypt_item(payload, &key)
        }
    }
}

fn select_backup_key<'a>(
    payload: &Payload,
    version: qn_core::ProtocolVersion,
    backup_root: Option<&'a RootKey>,
    backup_items_keys: &'a HashMap<Uuid, ItemsKeyContent>,
) -> Option<EncryptionKey<'a>> {
    if payload.content_type.is_root_key_encrypted() {
        return backup_root.map(EncryptionKey::Root);
    }
    if let Some(key_id) = payload.items_key_id {
        if let Some(content) = backup_items_keys.get(&key_id) {
            return Some(EncryptionKey::Items {
                uuid: key_id,
                content,
            });
        }
    }
    if version.uses_root_key_for_items() {
        return backup_root.map(EncryptionKey::Root);
    }
    backup_items_keys
        .iter()
        .find(|(_, k)| k.version == version && k.is_default)
        .or_else(|| backup_items_keys.iter().find(|(_, k)| k.version == version))
        .map(|(uuid, content)| EncryptionKey::Items {
            uuid: *uuid,
            content,
        })
}

fn restore_payload(original: &Payload, content: ItemContent) -> Payload {
    let mut content = content;
    if original.content_type == ContentType::ItemsKey {
        // The importing account keeps its own default; imported key material
        // is for decrypting the imported items only.
        content.set_extra("is_default", serde_json::Value::Bool(false));
    }
    original.mutated(|p| {
        p.content = Some(PayloadContent::Decrypted(content.clone()));
        p.enc_item_key = None;
        p.auth_hash = None;
        p.error_decrypting = false;
        p.waiting_for_key = false;
        p.dirty = true;
        p.dirtied_at = Some(now_ms());
        // Imported items are new to this account's server.
        p.updated_at = 0;
    })
}
