//! Items-key management: selection, creation, and the sync-boundary
//! reconciliation hooks.

use qn_core::time::now_ms;
use qn_core::{ContentType, ProtocolVersion, QnError, QnResult};
use qn_model::{
    Item, ItemMutator, ItemStore, ItemsKeyContent, MutationType, Payload, PayloadSource,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::key_manager::KeyMode;
use crate::service::ProtocolService;

/// Live items-key items, newest first.
fn items_keys(store: &ItemStore) -> Vec<&Item> {
    store.of_type(ContentType::ItemsKey)
}

/// The single default items key, or the lone items key if exactly one
/// exists (lenient fallback).
pub fn default_items_key(store: &ItemStore) -> Option<(Uuid, ItemsKeyContent)> {
    let keys = items_keys(store);
    let flagged = keys
        .iter()
        .find(|item| item.as_items_key().map(|k| k.is_default).unwrap_or(false));
    match flagged {
        Some(item) => Some((item.uuid(), item.as_items_key()?)),
        None if keys.len() == 1 => Some((keys[0].uuid(), keys[0].as_items_key()?)),
        None => None,
    }
}

/// The default items key for a specific protocol version.
pub fn default_items_key_for_version(
    store: &ItemStore,
    version: ProtocolVersion,
) -> Option<(Uuid, ItemsKeyContent)> {
    items_keys(store)
        .into_iter()
        .filter_map(|item| item.as_items_key().map(|k| (item.uuid(), k)))
        .find(|(_, k)| k.version == version && k.is_default)
}

/// Any live items key carrying material for the given version; used for
/// legacy payloads after the account itself has moved on.
pub fn any_items_key_for_version(
    store: &ItemStore,
    version: ProtocolVersion,
) -> Option<(Uuid, ItemsKeyContent)> {
    items_keys(store)
        .into_iter()
        .filter_map(|item| item.as_items_key().map(|k| (item.uuid(), k)))
        .find(|(_, k)| k.version == version)
}

/// The items key a payload was encrypted under: its `items_key_id` if it
/// carries one, else the default for the payload's version.
pub fn items_key_for_payload(
    store: &ItemStore,
    payload: &Payload,
) -> Option<(Uuid, ItemsKeyContent)> {
    if let Some(key_id) = payload.items_key_id {
        return store
            .get(key_id)
            .filter(|item| !item.deleted())
            .and_then(|item| item.as_items_key().map(|k| (item.uuid(), k)));
    }
    let version = payload.content_version()?;
    default_items_key_for_version(store, version)
}

/// Create a new default items key tied to the current root-key version,
/// un-flagging the previous default. Both old and new are marked dirty.
pub fn create_new_default_items_key(
    service: &mut ProtocolService,
    store: &mut ItemStore,
) -> QnResult<Uuid> {
    let root_key = service
        .key_manager()
        .root_key()
        .cloned()
        .ok_or_else(|| QnError::KeyMissing {
            operation: "create items key".into(),
        })?;

    let operator = service.registry_mut().operator_for(root_key.version())?;
    let mut content = operator.create_items_key_content(&root_key);
    content.is_default = true;

    let mut batch = Vec::new();
    if let Some((previous_uuid, _)) = default_items_key(store) {
        if let Some(previous) = store.get(previous_uuid) {
            let mut mutator = ItemMutator::new(previous, MutationType::Internal)?;
            mutator
                .content_mut()
                .set_extra("is_default", serde_json::Value::Bool(false));
            batch.push(mutator.finish());
        }
    }

    let mut payload =
        Payload::new_decrypted(ContentType::ItemsKey, content.into_item_content());
    payload.dirty = true;
    payload.dirtied_at = Some(now_ms());
    let new_uuid = payload.uuid;
    batch.push(payload);

    store.apply(batch, PayloadSource::LocalChanged);
    debug!(uuid = %new_uuid, version = %root_key.version(), "created default items key");
    Ok(new_uuid)
}

/// Download-first reconciliation: resolve never-synced local keys against
/// what the server returned before anything is uploaded.
pub fn reconcile_after_download_first(
    service: &mut ProtocolService,
    store: &mut ItemStore,
) -> QnResult<()> {
    let never_synced: Vec<Uuid> = items_keys(store)
        .into_iter()
        .filter(|item| item.payload().never_synced())
        .map(Item::uuid)
        .collect();

    let synced_default_exists = items_keys(store).into_iter().any(|item| {
        !item.payload().never_synced()
            && item.as_items_key().map(|k| k.is_default).unwrap_or(false)
    });

    if synced_default_exists {
        // The account already has a live default on the server; local
        // provisional keys lose.
        for uuid in never_synced {
            debug!(%uuid, "dropping never-synced items key in favor of server default");
            store.discard(uuid);
        }
        return Ok(());
    }

    let current_version = service
        .key_manager()
        .root_key()
        .map(|k| k.version());
    for uuid in never_synced {
        let keep = store
            .get(uuid)
            .and_then(Item::as_items_key)
            .map(|k| Some(k.version) == current_version)
            .unwrap_or(false);
        if !keep {
            warn!(%uuid, "dropping never-synced items key with stale version");
            store.discard(uuid);
        }
    }

    if default_items_key(store).is_none() && service.key_manager().root_key().is_some() {
        create_new_default_items_key(service, store)?;
    }
    Ok(())
}

/// Full-sync reconciliation: guarantee a default key exists; in
/// `WrapperOnly` mode the caller must additionally re-persist all items
/// (the encryption scope changed), signalled by the returned flag.
pub fn reconcile_after_full_sync(
    service: &mut ProtocolService,
    store: &mut ItemStore,
) -> QnResult<bool> {
    if default_items_key(store).is_none() && service.key_manager().root_key().is_some() {
        create_new_default_items_key(service, store)?;
    }
    Ok(service.key_manager().mode() == KeyMode::WrapperOnly)
}
