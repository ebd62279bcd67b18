//! Indexed container of current items: keyed by uuid with a content-type
//! secondary index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use qn_core::ContentType;
use uuid::Uuid;

use crate::item::Item;

#[derive(Debug, Default)]
pub struct ItemCollection {
    items: BTreeMap<Uuid, Item>,
    by_type: HashMap<ContentType, BTreeSet<Uuid>>,
}

impl ItemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the superseded item if any.
    pub fn insert(&mut self, item: Item) -> Option<Item> {
        let uuid = item.uuid();
        let content_type = item.content_type();
        self.by_type.entry(content_type).or_default().insert(uuid);
        let previous = self.items.insert(uuid, item);
        if let Some(prev) = &previous {
            if prev.content_type() != content_type {
                if let Some(set) = self.by_type.get_mut(&prev.content_type()) {
                    set.remove(&uuid);
                }
            }
        }
        previous
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<Item> {
        let removed = self.items.remove(&uuid);
        if let Some(item) = &removed {
            if let Some(set) = self.by_type.get_mut(&item.content_type()) {
                set.remove(&uuid);
                if set.is_empty() {
                    self.by_type.remove(&item.content_type());
                }
            }
        }
        removed
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Item> {
        self.items.get(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.items.contains_key(&uuid)
    }

    pub fn all(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Non-deleted items of one content type, in uuid order.
    pub fn of_type(&self, content_type: ContentType) -> Vec<&Item> {
        self.by_type
            .get(&content_type)
            .map(|set| {
                set.iter()
                    .filter_map(|uuid| self.items.get(uuid))
                    .filter(|item| !item.deleted())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.by_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ItemContent;
    use crate::payload::Payload;

    fn item_of(content_type: ContentType) -> Item {
        Item::from_payload(Payload::new_decrypted(content_type, ItemContent::new()))
    }

    #[test]
    fn test_insert_get_remove() {
        let mut collection = ItemCollection::new();
        let item = item_of(ContentType::Note);
        let uuid = item.uuid();

        assert!(collection.insert(item).is_none());
        assert!(collection.contains(uuid));
        assert_eq!(collection.of_type(ContentType::Note).len(), 1);

        collection.remove(uuid);
        assert!(!collection.contains(uuid));
        assert!(collection.of_type(ContentType::Note).is_empty());
    }

    #[test]
    fn test_replace_returns_superseded() {
        let mut collection = ItemCollection::new();
        let item = item_of(ContentType::Note);
        let uuid = item.uuid();
        collection.insert(item.clone());

        let successor = Item::from_payload(item.payload().mutated(|p| p.dirty = true));
        let superseded = collection.insert(successor).unwrap();
        assert_eq!(superseded.uuid(), uuid);
        assert!(!superseded.dirty());
        assert!(collection.get(uuid).unwrap().dirty());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_of_type_skips_deleted() {
        let mut collection = ItemCollection::new();
        let item = item_of(ContentType::Tag);
        let tombstone = Item::from_payload(item.payload().mutated(|p| p.deleted = true));
        collection.insert(tombstone);
        assert!(collection.of_type(ContentType::Tag).is_empty());
        assert_eq!(collection.len(), 1, "tombstone stays until discarded");
    }
}
