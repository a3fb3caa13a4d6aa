//! Run-wide record of evaluated pairs, shared across workers.
//!
//! Insertion is an atomic test-and-set: exactly one worker wins the right to
//! evaluate a key. Losing that race must skip the work entirely, otherwise the
//! same evidence is counted twice.

use std::hash::Hash;

use dashmap::DashSet;

use crate::concept::ConceptPair;

/// Set of explored keys plus the subset permanently rejected.
#[derive(Debug)]
pub struct ExploredSet<K: Eq + Hash = ConceptPair> {
    explored: DashSet<K>,
    rejected: DashSet<K>,
}

impl<K: Eq + Hash + Clone> ExploredSet<K> {
    pub fn new() -> Self {
        Self {
            explored: DashSet::new(),
            rejected: DashSet::new(),
        }
    }

    /// Claim `key`. Returns `true` only for the first caller.
    pub fn try_claim(&self, key: K) -> bool {
        self.explored.insert(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.explored.contains(key)
    }

    /// Mark a claimed key as rejected for the rest of the run.
    pub fn reject(&self, key: K) {
        self.explored.insert(key.clone());
        self.rejected.insert(key);
    }

    pub fn is_rejected(&self, key: &K) -> bool {
        self.rejected.contains(key)
    }

    pub fn len(&self) -> usize {
        self.explored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explored.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for ExploredSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
