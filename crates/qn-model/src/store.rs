//! The payload/item pipeline: applies payload batches to the collection,
//! maintains the reference graph, and fans changes out to observers.
//!
//! Emissions are processed in submission order; observers are invoked in
//! registration order. All of this is synchronous bookkeeping between
//! suspension points.

use qn_core::{ContentType, QnError, QnResult};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::collection::ItemCollection;
use crate::content::Reference;
use crate::fields::PayloadSource;
use crate::graph::ReferenceGraph;
use crate::item::Item;
use crate::mutator::{ItemMutator, MutationType, PayloadMutation};
use crate::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Inserted,
    Changed,
}

/// Observer callback: `(items, source, kind)`.
pub type ItemObserverFn = Box<dyn FnMut(&[Item], PayloadSource, ObservationKind)>;

struct Observer {
    /// Empty list means any content type.
    content_types: Vec<ContentType>,
    callback: ItemObserverFn,
}

#[derive(Default)]
pub struct ItemStore {
    collection: ItemCollection,
    graph: ReferenceGraph,
    observers: Vec<Observer>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for the given content types; `None` observes
    /// everything.
    pub fn observe(&mut self, content_types: Option<Vec<ContentType>>, callback: ItemObserverFn) {
        self.observers.push(Observer {
            content_types: content_types.unwrap_or_default(),
            callback,
        });
    }

    /// Apply a payload batch: project items, maintain the graph, update the
    /// collection, notify observers. Returns the resulting items in input
    /// order.
    pub fn apply(&mut self, payloads: Vec<Payload>, source: PayloadSource) -> Vec<Item> {
        let mut inserted = Vec::new();
        let mut changed = Vec::new();
        let mut applied = Vec::with_capacity(payloads.len());

        for payload in payloads {
            let uuid = payload.uuid;
            let existed = self.collection.contains(uuid);
            let item = Item::from_payload(payload);

            if item.deleted() {
                self.graph.purge(uuid);
            } else if let Some(content) = item.content() {
                let references = content.references.iter().map(|r| r.uuid).collect();
                self.graph.set_references(uuid, references);
            }
            // Errored items keep their previous graph entries until a
            // successful decrypt replaces them.

            self.collection.insert(item.clone());
            if existed {
                changed.push(item.clone());
            } else {
                inserted.push(item.clone());
            }
            applied.push(item);
        }

        self.notify(&inserted, source, ObservationKind::Inserted);
        self.notify(&changed, source, ObservationKind::Changed);
        applied
    }

    fn notify(&mut self, items: &[Item], source: PayloadSource, kind: ObservationKind) {
        if items.is_empty() {
            return;
        }
        for observer in &mut self.observers {
            if observer.content_types.is_empty() {
                (observer.callback)(items, source, kind);
                continue;
            }
            let filtered: Vec<Item> = items
                .iter()
                .filter(|i| observer.content_types.contains(&i.content_type()))
                .cloned()
                .collect();
            if !filtered.is_empty() {
                (observer.callback)(&filtered, source, kind);
            }
        }
    }

    /// Remove a discardable payload entirely (tombstone confirmed by the
    /// server).
    pub fn discard(&mut self, uuid: Uuid) {
        self.graph.purge(uuid);
        self.collection.remove(uuid);
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Item> {
        self.collection.get(uuid)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.collection.all()
    }

    pub fn of_type(&self, content_type: ContentType) -> Vec<&Item> {
        self.collection.of_type(content_type)
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn clear(&mut self) {
        self.collection.clear();
        self.graph = ReferenceGraph::new();
    }

    pub fn references_of(&self, uuid: Uuid) -> &[Uuid] {
        self.graph.references_of(uuid)
    }

    pub fn referencing(&self, uuid: Uuid) -> &[Uuid] {
        self.graph.referencing(uuid)
    }

    #[cfg(test)]
    pub fn graph_is_consistent(&self) -> bool {
        self.graph.is_consistent()
    }

    /// The upload set: dirty, not dummy, and corrupt only if deleted.
    pub fn dirty_payloads(&self) -> Vec<Payload> {
        self.collection
            .all()
            .map(Item::payload)
            .filter(|p| p.is_uploadable_dirty())
            .cloned()
            .collect()
    }

    /// Duplicate an item under a fresh uuid with `conflict_of` set to the
    /// original. Items referencing the original are updated to also
    /// reference the duplicate, so the copy stays reachable.
    pub fn duplicate_as_conflict(&mut self, uuid: Uuid) -> QnResult<Uuid> {
        let original = self
            .collection
            .get(uuid)
            .ok_or_else(|| QnError::StorageReadError(format!("no item {uuid}")))?
            .clone();

        let mut copy_payload = original.payload().clone();
        copy_payload.uuid = Uuid::new_v4();
        let new_uuid = copy_payload.uuid;
        let mut mutator = ItemMutator::new_from_payload(copy_payload, MutationType::Internal);
        mutator
            .content_mut()
            .set_extra("conflict_of", Value::String(uuid.to_string()));
        let duplicate = mutator.finish();

        let mut batch = vec![duplicate];
        batch.extend(self.link_referencers(uuid, new_uuid, original.content_type())?);
        debug!(original = %uuid, duplicate = %new_uuid, "created conflicted duplicate");
        self.apply(batch, PayloadSource::LocalChanged);
        Ok(new_uuid)
    }

    /// The only code path that changes a uuid: tombstone the old item and
    /// recreate its content under a fresh uuid, rewriting every reference to
    /// the old uuid.
    pub fn alternate_uuid(&mut self, uuid: Uuid) -> QnResult<Uuid> {
        let original = self
            .collection
            .get(uuid)
            .ok_or_else(|| QnError::StorageReadError(format!("no item {uuid}")))?
            .clone();

        let mut recreated = original.payload().clone();
        recreated.uuid = Uuid::new_v4();
        recreated.dirty = true;
        recreated.dirtied_at = Some(qn_core::time::now_ms());
        recreated.updated_at = 0;
        let new_uuid = recreated.uuid;

        let tombstone = original.payload().mutated(|p| {
            p.deleted = true;
            p.dirty = true;
            p.dirtied_at = Some(qn_core::time::now_ms());
        });

        let mut batch = vec![tombstone, recreated];
        for referencer in self.graph.referencing(uuid).to_vec() {
            let Some(item) = self.collection.get(referencer) else {
                continue;
            };
            let mut mutator = ItemMutator::new(item, MutationType::Internal)?;
            mutator.remove_reference(uuid);
            mutator.add_reference(Reference {
                uuid: new_uuid,
                content_type: original.content_type(),
            });
            batch.push(mutator.finish());
        }

        debug!(old = %uuid, new = %new_uuid, "alternated uuid");
        self.apply(batch, PayloadSource::LocalChanged);
        Ok(new_uuid)
    }

    fn link_referencers(
        &self,
        original: Uuid,
        duplicate: Uuid,
        content_type: ContentType,
    ) -> QnResult<Vec<Payload>> {
        let mut out = Vec::new();
        for referencer in self.graph.referencing(original) {
            let Some(item) = self.collection.get(*referencer) else {
                continue;
            };
            let mut mutator = ItemMutator::new(item, MutationType::Internal)?;
            mutator.add_reference(Reference {
                uuid: duplicate,
                content_type,
            });
            out.push(mutator.finish());
        }
        Ok(out)
    }
}
