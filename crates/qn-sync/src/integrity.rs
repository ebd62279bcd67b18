//! Integrity hash: both ends hash the sorted `uuid:updated_at` lines of all
//! non-deleted synced items; disagreement means the data sets diverged.

use qn_model::ItemStore;
use sha2::{Digest, Sha256};

/// Hash of the local collection in the server's composition.
pub fn compute_integrity_hash(store: &ItemStore) -> String {
    let mut lines: Vec<String> = store
        .items()
        .map(qn_model::Item::payload)
        .filter(|p| !p.deleted && p.updated_at > 0 && !p.content_type.is_local_only())
        .map(|p| format!("{}:{}", p.uuid, p.updated_at))
        .collect();
    lines.sort();
    hash_lines(&lines)
}

/// Shared line-hashing used by the client and test servers.
pub fn hash_lines(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(lines.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}
