//! The normalized record store: a mapping from canonical record identity to
//! a record, with ref-typed attributes forming a DAG across records.
//!
//! The graph itself is passive storage. Write coalescing and the
//! touched-set broadcast are orchestrated by the cache facade, which
//! funnels every top-level write through one transaction and hands the
//! union of touched keys to the watcher engine.

pub mod keys;
pub mod record;

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::trace;

use crate::graph::record::Key;
use crate::graph::record::Record;

/// The set of record keys a write burst affected.
pub type TouchedSet = IndexSet<Key>;

/// Record table. Entity insertion order is not maintained (only connection
/// edge order is, inside the records themselves).
#[derive(Default)]
pub struct EntityGraph {
    records: HashMap<Key, Arc<Record>>,
    version: u64,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter, bumped once per changed record. Used by the
    /// overlay fold cache to detect stale folds.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Record>> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Merges `partial` attribute-wise over the existing record, creating
    /// it if absent. The key lands in `touched` only when something
    /// actually changed.
    pub fn put(&mut self, key: Key, partial: Record, touched: &mut TouchedSet) {
        match self.records.get_mut(&key) {
            Some(existing) => {
                if Arc::make_mut(existing).merge_from(&partial) {
                    self.version += 1;
                    trace!(key = %key, "record updated");
                    touched.insert(key);
                }
            }
            None => {
                trace!(key = %key, "record created");
                self.records.insert(key.clone(), Arc::new(partial));
                self.version += 1;
                touched.insert(key);
            }
        }
    }

    /// Replaces the record wholesale (connection canonical maintenance
    /// rewrites edge lists atomically through this).
    pub fn put_replace(&mut self, key: Key, record: Record, touched: &mut TouchedSet) {
        if self.records.get(&key).map(|r| &**r) == Some(&record) {
            return;
        }
        self.records.insert(key.clone(), Arc::new(record));
        self.version += 1;
        touched.insert(key);
    }

    pub fn remove(&mut self, key: &str, touched: &mut TouchedSet) {
        if let Some((key, _)) = self.records.remove_entry(key) {
            self.version += 1;
            touched.insert(key);
        }
    }

    /// Drops every record; used by `hydrate` before loading a snapshot.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = (Key, Record)>) -> TouchedSet {
        let mut touched: TouchedSet = self.records.keys().cloned().collect();
        self.records.clear();
        for (key, record) in records {
            touched.insert(key.clone());
            self.records.insert(key, Arc::new(record));
        }
        self.version += 1;
        touched
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
