//! Shared test harness: an in-memory sync server and a wired client
//! context.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use qn_core::config::QnConfig;
use qn_core::device::{MemoryKeyValueStore, MemoryKeychain};
use qn_core::{QnError, QnResult};
use qn_model::{ItemContent, ItemStore, Payload};
use qn_protocol::{ProtocolService, StorageFacade};
use qn_sync::controller::{SyncController, SyncDeps};
use qn_sync::integrity::hash_lines;
use qn_sync::wire::{ConflictType, SyncConflict, SyncRequest, SyncResponse};
use qn_sync::SyncApi;
use serde_json::json;
use uuid::Uuid;

pub struct StoredItem {
    pub payload: Payload,
    pub revision: i64,
}

/// In-memory stand-in for the sync server: revision-ordered retrieval with
/// paging, uuid/sync conflict detection, and integrity hashing.
#[derive(Default)]
pub struct MockServer {
    pub items: BTreeMap<Uuid, StoredItem>,
    pub revision: i64,
    /// Uuids owned by other accounts; inserts against them collide.
    pub foreign_uuids: HashSet<Uuid>,
    /// Every non-empty upload batch size, in order.
    pub upload_batches: Vec<usize>,
    /// Every uploaded payload, in order.
    pub uploaded: Vec<Payload>,
    pub request_count: usize,
    pub page_size: usize,
    pub fail_next: bool,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Self::default()
        }
    }

    /// Inject a server-side change as if another client had uploaded it.
    pub fn seed_item(&mut self, payload: Payload) {
        self.revision += 1;
        let mut stored = payload;
        stored.updated_at = 1_000 + self.revision;
        self.items.insert(
            stored.uuid,
            StoredItem {
                payload: stored,
                revision: self.revision,
            },
        );
    }

    pub fn integrity_hash(&self) -> String {
        let mut lines: Vec<String> = self
            .items
            .values()
            .filter(|s| !s.payload.deleted)
            .map(|s| format!("{}:{}", s.payload.uuid, s.payload.updated_at))
            .collect();
        lines.sort();
        hash_lines(&lines)
    }

    fn handle_upload(&mut self, incoming: Payload, response: &mut SyncResponse) {
        if self.foreign_uuids.contains(&incoming.uuid) {
            if incoming.deleted {
                // Tombstone for a uuid this account never owned; drop it.
                return;
            }
            response.conflicts.push(SyncConflict {
                conflict_type: ConflictType::UuidConflict,
                server_item: None,
                unsaved_item: Some(incoming),
            });
            return;
        }

        if let Some(stored) = self.items.get(&incoming.uuid) {
            if stored.payload.updated_at != incoming.updated_at {
                // Stale base or colliding insert.
                if incoming.updated_at == 0 {
                    response.conflicts.push(SyncConflict {
                        conflict_type: ConflictType::UuidConflict,
                        server_item: Some(stored.payload.clone()),
                        unsaved_item: Some(incoming),
                    });
                } else {
                    response.conflicts.push(SyncConflict {
                        conflict_type: ConflictType::SyncConflict,
                        server_item: Some(stored.payload.clone()),
                        unsaved_item: Some(incoming),
                    });
                }
                return;
            }
        }

        self.revision += 1;
        let mut stored = incoming;
        stored.updated_at = 1_000 + self.revision;
        if stored.deleted {
            stored.content = None;
            stored.enc_item_key = None;
        }
        let mut ack = Payload::new(stored.uuid, stored.content_type);
        ack.updated_at = stored.updated_at;
        ack.created_at = stored.created_at;
        ack.deleted = stored.deleted;
        response.saved_items.push(ack);
        self.items.insert(
            stored.uuid,
            StoredItem {
                payload: stored,
                revision: self.revision,
            },
        );
    }
}

#[async_trait(?Send)]
impl SyncApi for MockServer {
    async fn sync(&mut self, request: SyncRequest) -> QnResult<SyncResponse> {
        self.request_count += 1;
        if self.fail_next {
            self.fail_next = false;
            return Err(QnError::SyncNetworkError("connection refused".into()));
        }

        let since: i64 = request
            .cursor_token
            .as_deref()
            .or(request.sync_token.as_deref())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);

        let mut response = SyncResponse::default();

        if !request.items.is_empty() {
            self.upload_batches.push(request.items.len());
        }
        let uploaded_uuids: HashSet<Uuid> = request.items.iter().map(|p| p.uuid).collect();
        for incoming in request.items {
            self.uploaded.push(incoming.clone());
            self.handle_upload(incoming, &mut response);
        }

        // Revision-ordered retrieval, excluding what this request uploaded.
        let mut pending: Vec<(&i64, &Payload)> = Vec::new();
        let mut stored: Vec<&StoredItem> = self.items.values().collect();
        stored.sort_by_key(|s| s.revision);
        for item in stored {
            if item.revision > since && !uploaded_uuids.contains(&item.payload.uuid) {
                pending.push((&item.revision, &item.payload));
            }
        }

        let page: Vec<Payload> = pending
            .iter()
            .take(self.page_size)
            .map(|(_, p)| (*p).clone())
            .collect();
        if pending.len() > self.page_size {
            let last_revision = pending[self.page_size - 1].0;
            response.cursor_token = Some(last_revision.to_string());
        }
        response.retrieved_items = page;
        response.sync_token = Some(self.revision.to_string());
        if request.compute_integrity {
            response.integrity_hash = Some(self.integrity_hash());
        }
        Ok(response)
    }
}

/// A wired client: service, storage, store, and controller over in-memory
/// devices with fast KDF costs.
pub struct TestClient {
    pub service: ProtocolService,
    pub storage: StorageFacade,
    pub store: ItemStore,
    pub controller: SyncController,
}

impl TestClient {
    pub fn new() -> Self {
        let mut config = QnConfig::default();
        config.crypto.argon2_mem_cost_kib = 1024;
        config.crypto.argon2_time_cost = 1;

        let service = ProtocolService::new(&config, Box::new(MemoryKeychain::new()));
        let mut storage =
            StorageFacade::open(Box::new(MemoryKeyValueStore::new()), "test").unwrap();
        storage.set_launched();
        Self {
            service,
            storage,
            store: ItemStore::new(),
            controller: SyncController::new(config.sync),
        }
    }

    pub fn deps<'a>(&'a mut self, api: &'a mut MockServer) -> (&'a mut SyncController, SyncDeps<'a>) {
        (
            &mut self.controller,
            SyncDeps {
                api,
                service: &mut self.service,
                store: &mut self.store,
                storage: &mut self.storage,
            },
        )
    }
}

pub fn note_payload(title: &str, text: &str) -> Payload {
    let mut content = ItemContent::new();
    content.set_extra("title", json!(title));
    content.set_extra("text", json!(text));
    Payload::new_decrypted(qn_core::ContentType::Note, content)
}

pub fn tag_payload(title: &str, referenced: &[&Payload]) -> Payload {
    let mut content = ItemContent::new();
    content.set_extra("title", json!(title));
    for target in referenced {
        content.references.push(qn_model::Reference {
            uuid: target.uuid,
            content_type: target.content_type,
        });
    }
    Payload::new_decrypted(qn_core::ContentType::Tag, content)
}
