//! Session orchestration: register and sign-in flows that combine the
//! credential operations with the right sync sequence. Syncing is locked
//! for the duration so the auto-timer cannot interleave.

use qn_core::time::now_ms;
use qn_core::QnResult;
use qn_crypto::KeyParams;
use qn_model::{Payload, PayloadSource};
use qn_protocol::credentials;
use tracing::info;

use crate::controller::{SyncController, SyncDeps, SyncMode, SyncOptions, SyncQueueStrategy};

/// Register a new account and run the first full sync, which uploads the
/// fresh default items key alongside any local data.
pub async fn register(
    controller: &mut SyncController,
    deps: &mut SyncDeps<'_>,
    identifier: &str,
    password: &str,
) -> QnResult<()> {
    controller.lock_syncing();
    let result = credentials::register(
        deps.service,
        deps.storage,
        deps.store,
        identifier,
        password,
    );
    controller.unlock_syncing();
    result?;

    controller.sync(SyncOptions::default(), deps).await?;
    Ok(())
}

/// Sign in to an existing account, merging local data into it:
/// every local item is dirtied for upload, then a download-first sync pulls
/// the account's data before anything goes up. Uuid collisions surface as
/// server conflicts and are alternated by the controller.
pub async fn sign_in(
    controller: &mut SyncController,
    deps: &mut SyncDeps<'_>,
    identifier: &str,
    password: &str,
    server_key_params: &KeyParams,
) -> QnResult<()> {
    controller.lock_syncing();
    let result = credentials::sign_in(
        deps.service,
        deps.storage,
        deps.store,
        identifier,
        password,
        server_key_params,
    );
    controller.unlock_syncing();
    result?;

    dirty_all_local_items(deps);

    controller
        .sync(
            SyncOptions {
                mode: SyncMode::DownloadFirst,
                strategy: SyncQueueStrategy::ForceSpawnNew,
            },
            deps,
        )
        .await?;
    info!(identifier, "sign-in merge completed");
    Ok(())
}

/// Merge preparation: everything local must upload into the account.
fn dirty_all_local_items(deps: &mut SyncDeps<'_>) {
    let now = now_ms();
    let dirtied: Vec<Payload> = deps
        .store
        .items()
        .map(|item| {
            item.payload().mutated(|p| {
                p.dirty = true;
                p.dirtied_at = Some(now);
                // Local items are new to the server regardless of history.
                p.updated_at = 0;
            })
        })
        .collect();
    if !dirtied.is_empty() {
        deps.store.apply(dirtied, PayloadSource::LocalChanged);
    }
}
