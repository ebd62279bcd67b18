//! Singleton policy: content types where at most one live instance may
//! exist. Sync can race two clients into creating duplicates; the newest
//! copy wins and the losers are tombstoned.

use qn_core::time::now_ms;
use qn_core::{ContentType, QnResult};
use qn_model::{Item, ItemStore, Payload, PayloadSource};
use tracing::debug;
use uuid::Uuid;

const SINGLETON_TYPES: &[ContentType] = &[ContentType::UserPrefs, ContentType::Privileges];

/// Tombstone every live singleton duplicate except the newest. Returns the
/// uuids that lost.
pub fn resolve_singletons(store: &mut ItemStore) -> QnResult<Vec<Uuid>> {
    let mut losers = Vec::new();
    for content_type in SINGLETON_TYPES {
        let mut instances: Vec<&Item> = store.of_type(*content_type);
        if instances.len() <= 1 {
            continue;
        }
        // Newest wins; uuid breaks updated_at ties deterministically.
        instances.sort_by_key(|item| (item.updated_at(), item.uuid()));
        let winner = instances.last().map(|item| item.uuid());

        let tombstones: Vec<Payload> = instances
            .iter()
            .filter(|item| Some(item.uuid()) != winner)
            .map(|item| {
                item.payload().mutated(|p| {
                    p.deleted = true;
                    p.dirty = true;
                    p.dirtied_at = Some(now_ms());
                })
            })
            .collect();
        losers.extend(tombstones.iter().map(|p| p.uuid));
        if !tombstones.is_empty() {
            debug!(
                content_type = %content_type,
                count = tombstones.len(),
                "tombstoned singleton duplicates"
            );
            store.apply(tombstones, PayloadSource::LocalChanged);
        }
    }
    Ok(losers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qn_model::ItemContent;

    fn prefs(updated_at: i64) -> Payload {
        Payload::new_decrypted(ContentType::UserPrefs, ItemContent::new())
            .mutated(|p| p.updated_at = updated_at)
    }

    #[test]
    fn test_newest_singleton_wins() {
        let mut store = ItemStore::new();
        let older = prefs(100);
        let newer = prefs(200);
        store.apply(
            vec![older.clone(), newer.clone()],
            PayloadSource::LocalChanged,
        );

        let losers = resolve_singletons(&mut store).unwrap();
        assert_eq!(losers, vec![older.uuid]);

        let survivor = store.get(newer.uuid).unwrap();
        assert!(!survivor.deleted());
        let tombstone = store.get(older.uuid).unwrap();
        assert!(tombstone.deleted() && tombstone.dirty());
    }

    #[test]
    fn test_single_instance_untouched() {
        let mut store = ItemStore::new();
        let only = prefs(100);
        store.apply(vec![only.clone()], PayloadSource::LocalChanged);

        assert!(resolve_singletons(&mut store).unwrap().is_empty());
        assert!(!store.get(only.uuid).unwrap().deleted());
    }

    #[test]
    fn test_non_singleton_types_ignored() {
        let mut store = ItemStore::new();
        let a = Payload::new_decrypted(ContentType::Note, ItemContent::new());
        let b = Payload::new_decrypted(ContentType::Note, ItemContent::new());
        store.apply(vec![a, b], PayloadSource::LocalChanged);

        assert!(resolve_singletons(&mut store).unwrap().is_empty());
    }
}
