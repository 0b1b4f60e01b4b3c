//! Collaborator interface for table-maintained secondary indexes.
//!
//! Index entries are created at insert time and removed by the insertion
//! rollback path or the garbage collector; commit and abort never touch
//! them. A probe can therefore surface slots whose version is dead or
//! uncommitted, and every caller re-checks MVCC visibility on each hit.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use osprey_common::types::ItemPointer;

pub trait Index: Send + Sync {
    fn name(&self) -> &str;

    fn is_unique(&self) -> bool;

    /// Adds a `key -> location` entry. Returns false when a unique
    /// constraint rejects the key; the caller unwinds the insertion.
    fn insert_entry(&self, key: &[u8], location: ItemPointer) -> bool;

    /// Removes one entry. Returns false when no matching entry existed.
    fn delete_entry(&self, key: &[u8], location: ItemPointer) -> bool;

    /// Exact-key probe.
    fn scan_key(&self, key: &[u8]) -> Vec<ItemPointer>;

    fn entry_count(&self) -> usize;
}

/// Ordered-map reference implementation.
pub struct BTreeIndex {
    name: String,
    unique: bool,
    entries: RwLock<BTreeMap<Vec<u8>, Vec<ItemPointer>>>,
}

impl BTreeIndex {
    pub fn new(name: impl Into<String>, unique: bool) -> Self {
        BTreeIndex {
            name: name.into(),
            unique,
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Index for BTreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn insert_entry(&self, key: &[u8], location: ItemPointer) -> bool {
        let mut entries = self.entries.write();
        let bucket = entries.entry(key.to_vec()).or_default();
        if self.unique && !bucket.is_empty() {
            return false;
        }
        bucket.push(location);
        true
    }

    fn delete_entry(&self, key: &[u8], location: ItemPointer) -> bool {
        let mut entries = self.entries.write();
        let Some(bucket) = entries.get_mut(key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|loc| *loc != location);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            entries.remove(key);
        }
        removed
    }

    fn scan_key(&self, key: &[u8]) -> Vec<ItemPointer> {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    fn entry_count(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }
}
