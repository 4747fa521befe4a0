//! Run-scoped membership sets and counter-name interning.
//!
//! Entity pool tables (distinct call-stack frames, exec-window frames,
//! GPU parents, I/O steps, rank↔host pairs) must never re-emit a row
//! once written, even though their staging buffers are cleared after
//! every flush. The key sets here outlive the buffers and only grow.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Membership test gating inserts into one entity pool table.
#[derive(Debug, Default)]
pub struct KeySet<K: Eq + Hash> {
    seen: HashSet<K>,
}

impl<K: Eq + Hash> KeySet<K> {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Returns true iff the key was newly inserted.
    pub fn insert_if_absent(&mut self, key: K) -> bool {
        self.seen.insert(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Run-scoped mapping from counter name to a small dense index.
///
/// Owned by the orchestrator and passed by reference to the importers
/// that need it, which keeps its lifecycle (and any future
/// synchronization) explicit.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    indices: HashMap<String, u32>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self {
            indices: HashMap::new(),
        }
    }

    /// Returns the index for `name`, assigning the next dense index on
    /// first sight. The second element is true iff this call assigned.
    pub fn intern(&mut self, name: &str) -> (u32, bool) {
        if let Some(&idx) = self.indices.get(name) {
            return (idx, false);
        }
        let idx = self.indices.len() as u32;
        self.indices.insert(name.to_string(), idx);
        (idx, true)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.indices.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
