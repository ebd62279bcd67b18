//! Forward and inverse reference indices over item→item references.
//!
//! Two flat maps keyed by uuid; traversals never follow item-to-item links
//! directly, so cycles need no special lifetime handling. Invariant: for
//! every pair (A, B), A ∈ inverse[B] ⇔ B ∈ forward[A].

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ReferenceGraph {
    forward: HashMap<Uuid, Vec<Uuid>>,
    inverse: HashMap<Uuid, Vec<Uuid>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace forward[uuid] with the given reference list, updating the
    /// inverse index incrementally.
    pub fn set_references(&mut self, uuid: Uuid, references: Vec<Uuid>) {
        self.remove_forward_entries(uuid);
        for referent in &references {
            let entry = self.inverse.entry(*referent).or_default();
            if !entry.contains(&uuid) {
                entry.push(uuid);
            }
        }
        if references.is_empty() {
            self.forward.remove(&uuid);
        } else {
            self.forward.insert(uuid, references);
        }
    }

    /// Remove every trace of the uuid, both as referencer and as referent;
    /// used on deletion.
    pub fn purge(&mut self, uuid: Uuid) {
        self.remove_forward_entries(uuid);
        if let Some(referencers) = self.inverse.remove(&uuid) {
            for referencer in referencers {
                if let Some(fwd) = self.forward.get_mut(&referencer) {
                    fwd.retain(|u| *u != uuid);
                    if fwd.is_empty() {
                        self.forward.remove(&referencer);
                    }
                }
            }
        }
    }

    fn remove_forward_entries(&mut self, uuid: Uuid) {
        if let Some(old) = self.forward.remove(&uuid) {
            for referent in old {
                if let Some(inv) = self.inverse.get_mut(&referent) {
                    inv.retain(|u| *u != uuid);
                    if inv.is_empty() {
                        self.inverse.remove(&referent);
                    }
                }
            }
        }
    }

    /// Uuids that `uuid` references.
    pub fn references_of(&self, uuid: Uuid) -> &[Uuid] {
        self.forward.get(&uuid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Uuids that reference `uuid`.
    pub fn referencing(&self, uuid: Uuid) -> &[Uuid] {
        self.inverse.get(&uuid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.inverse.is_empty()
    }

    /// Check the bidirectional invariant; used by tests after mutations.
    pub fn is_consistent(&self) -> bool {
        for (a, referents) in &self.forward {
            for b in referents {
                match self.inverse.get(b) {
                    Some(referencers) if referencers.contains(a) => {}
                    _ => return false,
                }
            }
        }
        for (b, referencers) in &self.inverse {
            for a in referencers {
                match self.forward.get(a) {
                    Some(referents) if referents.contains(b) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn uuids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_set_maintains_both_directions() {
        let ids = uuids(3);
        let mut graph = ReferenceGraph::new();
        graph.set_references(ids[0], vec![ids[1], ids[2]]);

        assert_eq!(graph.references_of(ids[0]), &[ids[1], ids[2]]);
        assert_eq!(graph.referencing(ids[1]), &[ids[0]]);
        assert_eq!(graph.referencing(ids[2]), &[ids[0]]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_replace_removes_stale_inverse() {
        let ids = uuids(3);
        let mut graph = ReferenceGraph::new();
        graph.set_references(ids[0], vec![ids[1]]);
        graph.set_references(ids[0], vec![ids[2]]);

        assert!(graph.referencing(ids[1]).is_empty());
        assert_eq!(graph.referencing(ids[2]), &[ids[0]]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_purge_removes_incoming() {
        let ids = uuids(2);
        let mut graph = ReferenceGraph::new();
        graph.set_references(ids[0], vec![ids[1]]);
        graph.set_references(ids[1], vec![ids[0]]);

        graph.purge(ids[0]);
        assert!(graph.referencing(ids[0]).is_empty());
        assert!(graph.references_of(ids[1]).is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_cycle_needs_no_special_handling() {
        let ids = uuids(2);
        let mut graph = ReferenceGraph::new();
        graph.set_references(ids[0], vec![ids[1]]);
        graph.set_references(ids[1], vec![ids[0]]);
        assert!(graph.is_consistent());

        graph.purge(ids[0]);
        graph.purge(ids[1]);
        assert!(graph.is_empty());
    }
}
