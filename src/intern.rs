//! Hash-consing tables for canonical atoms and rules.
//!
//! A table maps the normalized constructor arguments of a node to a weak
//! handle of the node built from them. Nodes remove their own entry when the
//! last strong handle drops.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique node id. Ids are never reused.
fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct Interner<K, N> {
    table: Mutex<AHashMap<K, Weak<N>>>,
}

impl<K: Eq + Hash, N> Interner<K, N> {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(AHashMap::new()),
        }
    }

    /// Return the live node for `key`, or build one with a fresh id.
    pub(crate) fn intern<F>(&self, key: K, make: F) -> Arc<N>
    where
        F: FnOnce(u64) -> N,
    {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
            // `make` may own node handles whose drop re-enters the table.
            drop(table);
            return existing;
        }
        let node = Arc::new(make(next_id()));
        table.insert(key, Arc::downgrade(&node));
        node
    }

    /// Drop the entry for `key` unless it has been replaced by a live node.
    pub(crate) fn forget(&self, key: &K) {
        let mut table = self.table.lock();
        if table.get(key).map_or(false, |weak| weak.strong_count() == 0) {
            table.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }
}
