//! Server response processing: retrieved merges, saved acknowledgements,
//! and conflict handling.

use qn_core::time::now_ms;
use qn_core::{ContentType, QnResult};
use qn_model::{ItemStore, Payload, PayloadSource};
use qn_protocol::ProtocolService;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::wire::{ConflictType, SyncConflict};

/// Merge retrieved payloads into the store. Dirty local copies that differ
/// meaningfully become conflicted duplicates before the server copy
/// overwrites their uuid. Returns the uuids dropped as discardable.
pub fn process_retrieved(
    service: &mut ProtocolService,
    store: &mut ItemStore,
    retrieved: &[Payload],
) -> QnResult<Vec<Uuid>> {
    // Items keys decrypt first; other retrieved payloads may need them.
    let (keys, rest): (Vec<&Payload>, Vec<&Payload>) = retrieved
        .iter()
        .partition(|p| p.content_type == ContentType::ItemsKey);

    let mut discarded = Vec::new();
    for payload in keys.into_iter().chain(rest) {
        merge_one(service, store, payload, &mut discarded)?;
    }
    Ok(discarded)
}

fn merge_one(
    service: &mut ProtocolService,
    store: &mut ItemStore,
    server_payload: &Payload,
    discarded: &mut Vec<Uuid>,
) -> QnResult<()> {
    let decrypted = service.decrypt_payload(server_payload, store);

    if let Some(local) = store.get(decrypted.uuid) {
        let differs = match (local.content(), decrypted.decrypted_content()) {
            (Some(ours), Some(theirs)) => !ours.content_equals(theirs),
            // Undecryptable on either side counts as divergence.
            _ => true,
        };
        if local.dirty() && !local.deleted() && differs && !decrypted.deleted {
            let duplicate = store.duplicate_as_conflict(decrypted.uuid)?;
            debug!(original = %decrypted.uuid, %duplicate, "conflicted duplicate for dirty local");
        }
    }

    let uuid = decrypted.uuid;
    let discardable = decrypted.is_discardable();
    store.apply(vec![decrypted], PayloadSource::RemoteRetrieved);
    if discardable {
        store.discard(uuid);
        discarded.push(uuid);
    }
    Ok(())
}

/// Acknowledge saved payloads: adopt the server's `updated_at`, stamp
/// `last_sync_end`, and clear `dirty` only when no mutation intervened
/// since the sync began.
pub fn process_saved(store: &mut ItemStore, saved: &[Payload]) {
    let now = now_ms();
    let mut batch = Vec::with_capacity(saved.len());
    for ack in saved {
        let Some(local) = store.get(ack.uuid) else {
            continue;
        };
        let payload = local.payload().mutated(|p| {
            let no_intervening_mutation = match (p.dirtied_at, p.last_sync_begin) {
                (Some(dirtied), Some(begin)) => dirtied <= begin,
                (None, _) => true,
                (Some(_), None) => false,
            };
            if no_intervening_mutation {
                p.dirty = false;
                p.dirtied_at = None;
            }
            p.updated_at = ack.updated_at;
            p.last_sync_end = Some(now);
        });
        batch.push(payload);
    }
    if !batch.is_empty() {
        store.apply(batch, PayloadSource::RemoteSaved);
    }
}

/// Retry items stuck waiting for a key; called after retrieved batches land
/// in case the batch delivered the missing items key. Only successful
/// decrypts are re-emitted.
pub fn retry_undecrypted(service: &mut ProtocolService, store: &mut ItemStore) -> QnResult<usize> {
    let pending: Vec<Payload> = store
        .items()
        .map(qn_model::Item::payload)
        .filter(|p| p.waiting_for_key && p.encrypted_content().is_some())
        .cloned()
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let recovered: Vec<Payload> = pending
        .iter()
        .map(|p| service.decrypt_payload(p, store))
        .filter(|p| !p.error_decrypting)
        .collect();
    let count = recovered.len();
    if count > 0 {
        debug!(count, "recovered items after key arrival");
        store.apply(recovered, PayloadSource::LocalRetrieved);
    }
    Ok(count)
}

/// Handle server-reported conflicts.
pub fn process_conflicts(
    service: &mut ProtocolService,
    store: &mut ItemStore,
    conflicts: &[SyncConflict],
) -> QnResult<()> {
    let mut discarded = Vec::new();
    for conflict in conflicts {
        match conflict.conflict_type {
            ConflictType::UuidConflict => {
                let uuid = conflict
                    .unsaved_item
                    .as_ref()
                    .or(conflict.server_item.as_ref())
                    .map(|p| p.uuid);
                let Some(uuid) = uuid else {
                    warn!("uuid conflict without an item; skipping");
                    continue;
                };
                if store.get(uuid).is_some() {
                    let new_uuid = store.alternate_uuid(uuid)?;
                    debug!(old = %uuid, new = %new_uuid, "alternated uuid after conflict");
                }
                if let Some(server_item) = &conflict.server_item {
                    merge_one(service, store, server_item, &mut discarded)?;
                }
            }
            ConflictType::SyncConflict => {
                let Some(server_item) = &conflict.server_item else {
                    warn!("sync conflict without a server item; skipping");
                    continue;
                };
                merge_one(service, store, server_item, &mut discarded)?;
            }
        }
    }
    Ok(())
}
