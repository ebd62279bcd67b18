//! The sync controller: download-first reconciliation, multi-page paging,
//! conflict handling, locking, and integrity monitoring.
//!
//! A sync serializes its own steps; concurrent requests coalesce unless
//! `ForceSpawnNew` is used. `lock_syncing`/`unlock_syncing` gate new syncs
//! during sign-in, register, and password change so the auto-timer cannot
//! interleave.

use std::time::{Duration, Instant};

use qn_core::config::SyncConfig;
use qn_core::{AppEvent, QnError, QnResult};
use qn_model::{ItemStore, Payload, PayloadSource};
use qn_protocol::{items_keys, ProtocolService, StorageFacade};
use tracing::{debug, info, warn};

use crate::api::SyncApi;
use crate::integrity::compute_integrity_hash;
use crate::response;
use crate::wire::{to_server_payload, SyncRequest};

/// Bounded number of request rounds within one sync pass; conflict
/// resolution re-dirties items, so a pass may need several.
const MAX_SYNC_ROUNDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Pull and reconcile before anything is uploaded.
    DownloadFirst,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQueueStrategy {
    ForceSpawnNew,
    /// Coalesce with any in-flight sync.
    Resolve,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub strategy: SyncQueueStrategy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Default,
            strategy: SyncQueueStrategy::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Refused: syncing is locked for a credential operation.
    Locked,
    /// Coalesced into the in-flight sync.
    Coalesced,
}

/// Everything one sync pass operates over; collaborators are borrowed per
/// call, never stored.
pub struct SyncDeps<'a> {
    pub api: &'a mut dyn SyncApi,
    pub service: &'a mut ProtocolService,
    pub store: &'a mut ItemStore,
    pub storage: &'a mut StorageFacade,
}

pub struct SyncController {
    config: SyncConfig,
    sync_token: Option<String>,
    cursor_token: Option<String>,
    locked: bool,
    in_flight: bool,
    out_of_sync: bool,
    events: Vec<AppEvent>,
}

impl SyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            sync_token: None,
            cursor_token: None,
            locked: false,
            in_flight: false,
            out_of_sync: false,
            events: Vec::new(),
        }
    }

    pub fn lock_syncing(&mut self) {
        self.locked = true;
    }

    pub fn unlock_syncing(&mut self) {
        self.locked = false;
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    /// Drain events emitted since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: AppEvent) {
        debug!(?event, "sync event");
        self.events.push(event);
    }

    pub async fn sync(
        &mut self,
        options: SyncOptions,
        deps: &mut SyncDeps<'_>,
    ) -> QnResult<SyncOutcome> {
        if self.locked {
            return Ok(SyncOutcome::Locked);
        }
        if self.in_flight && options.strategy != SyncQueueStrategy::ForceSpawnNew {
            // Resolve and Default both fold into the running sync.
            return Ok(SyncOutcome::Coalesced);
        }

        self.in_flight = true;
        let result = self.run_sync(options.mode, deps).await;
        self.in_flight = false;

        match result {
            Ok(()) => Ok(SyncOutcome::Completed),
            Err(e) => {
                self.emit(AppEvent::FailedSync);
                Err(e)
            }
        }
    }

    async fn run_sync(&mut self, mode: SyncMode, deps: &mut SyncDeps<'_>) -> QnResult<()> {
        let started = Instant::now();

        if mode == SyncMode::DownloadFirst {
            self.download_first_pass(deps).await?;
            items_keys::reconcile_after_download_first(deps.service, deps.store)?;
            self.emit(AppEvent::DownloadFirstSyncCompleted);
        }

        let mut last_integrity_hash = None;
        for round in 0..MAX_SYNC_ROUNDS {
            let dirty = self.collect_and_stamp_dirty(deps.store);
            if round > 0 && dirty.is_empty() && self.cursor_token.is_none() {
                break;
            }

            let items: Vec<Payload> = deps
                .service
                .encrypt_payloads(&dirty, qn_protocol::EncryptionIntent::Sync, deps.store)?
                .iter()
                .map(to_server_payload)
                .collect();

            let request = SyncRequest {
                items,
                sync_token: self.sync_token.clone(),
                cursor_token: self.cursor_token.clone(),
                limit: self.config.batch_limit,
                compute_integrity: self.config.compute_integrity,
            };

            let response = self.round_trip(deps, request).await?;

            let discarded =
                response::process_retrieved(deps.service, deps.store, &response.retrieved_items)?;
            if !discarded.is_empty() {
                debug!(count = discarded.len(), "discarded retrieved tombstones");
            }
            response::retry_undecrypted(deps.service, deps.store)?;
            response::process_saved(deps.store, &response.saved_items);
            let had_conflicts = !response.conflicts.is_empty();
            response::process_conflicts(deps.service, deps.store, &response.conflicts)?;

            self.sync_token = response.sync_token.clone();
            self.cursor_token = response.cursor_token.clone();
            last_integrity_hash = response.integrity_hash.clone();

            if self.cursor_token.is_some() {
                // Multi-page sync: keep pulling.
                continue;
            }
            if !had_conflicts {
                break;
            }
            // Conflicts re-dirtied items; run another round to upload them.
        }

        if started.elapsed() > Duration::from_secs(self.config.high_latency_secs) {
            self.emit(AppEvent::HighLatencySync);
        }

        self.check_integrity(last_integrity_hash.as_deref(), deps);

        qn_protocol::singleton::resolve_singletons(deps.store)?;
        if items_keys::reconcile_after_full_sync(deps.service, deps.store)? {
            // WrapperOnly: encryption scope changed, re-persist everything.
            qn_protocol::bootstrap::persist_item_rows(deps.service, deps.storage, deps.store)?;
        }

        self.emit(AppEvent::FullSyncCompleted);
        info!("sync completed");
        Ok(())
    }

    /// The opening pass of a download-first sync: empty uploads, full drain
    /// of the server, no dirty set touched.
    async fn download_first_pass(&mut self, deps: &mut SyncDeps<'_>) -> QnResult<()> {
        loop {
            let request = SyncRequest {
                items: Vec::new(),
                sync_token: self.sync_token.clone(),
                cursor_token: self.cursor_token.clone(),
                limit: self.config.batch_limit,
                compute_integrity: false,
            };
            let response = self.round_trip(deps, request).await?;
            response::process_retrieved(deps.service, deps.store, &response.retrieved_items)?;
            response::retry_undecrypted(deps.service, deps.store)?;
            self.sync_token = response.sync_token.clone();
            self.cursor_token = response.cursor_token.clone();
            if self.cursor_token.is_none() {
                return Ok(());
            }
        }
    }

    async fn round_trip(
        &mut self,
        deps: &mut SyncDeps<'_>,
        request: SyncRequest,
    ) -> QnResult<crate::wire::SyncResponse> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(timeout, deps.api.sync(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("sync request exceeded hard timeout");
                Err(QnError::SyncNetworkError("request timed out".into()))
            }
        }
    }

    /// Snapshot the dirty set and stamp `last_sync_begin` on each member.
    fn collect_and_stamp_dirty(&self, store: &mut ItemStore) -> Vec<Payload> {
        let now = qn_core::time::now_ms();
        let stamped: Vec<Payload> = store
            .dirty_payloads()
            .into_iter()
            .map(|p| p.mutated(|p| p.last_sync_begin = Some(now)))
            .collect();
        if !stamped.is_empty() {
            store.apply(stamped.clone(), PayloadSource::LocalSaved);
        }
        stamped
    }

    fn check_integrity(&mut self, server_hash: Option<&str>, deps: &mut SyncDeps<'_>) {
        let Some(server_hash) = server_hash else {
            return;
        };
        let local_hash = compute_integrity_hash(deps.store);
        if server_hash == local_hash {
            if self.out_of_sync {
                self.out_of_sync = false;
                self.emit(AppEvent::ExitOutOfSync);
            }
        } else if !self.out_of_sync {
            warn!("integrity hash mismatch; entering out-of-sync");
            self.out_of_sync = true;
            self.emit(AppEvent::EnterOutOfSync);
        }
    }

    /// Recover from out-of-sync with a full deep pull: token state resets
    /// and every server item is re-retrieved, duplicating on divergence.
    pub async fn resolve_out_of_sync(&mut self, deps: &mut SyncDeps<'_>) -> QnResult<SyncOutcome> {
        self.sync_token = None;
        self.cursor_token = None;
        self.sync(
            SyncOptions {
                mode: SyncMode::DownloadFirst,
                strategy: SyncQueueStrategy::ForceSpawnNew,
            },
            deps,
        )
        .await
    }
}
