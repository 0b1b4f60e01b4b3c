//! Table-level tuple placement.
//!
//! A table owns an append-only sequence of tile groups, each with the slot
//! capacity configured through [`StorageConfig`]. Inserts land in the
//! newest group; when it fills up the table grows a fresh one. Group
//! offsets within the table never change, so an [`ItemPointer`] stays valid
//! for the table's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use osprey_common::config::StorageConfig;
use osprey_common::error::{hex_encode, OspreyResult, StorageError};
use osprey_common::types::{ItemPointer, TableId, TxnId};

use crate::catalog::Catalog;
use crate::index::Index;
use crate::tile_group::{TileGroup, TupleData};

/// Derives an index key from an opaque tuple payload.
pub type KeyFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Key extractor that indexes the whole payload.
pub fn identity_key() -> KeyFn {
    Arc::new(|tuple| tuple.to_vec())
}

struct RegisteredIndex {
    index: Arc<dyn Index>,
    key_of: KeyFn,
}

pub struct DataTable {
    id: TableId,
    name: String,
    tuples_per_group: u32,
    catalog: Arc<Catalog>,
    tile_groups: RwLock<Vec<Arc<TileGroup>>>,
    indexes: RwLock<Vec<RegisteredIndex>>,
    /// Slots handed out over the table's lifetime, both insert paths.
    tuple_count: AtomicU64,
}

impl DataTable {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        config: StorageConfig,
        catalog: Arc<Catalog>,
    ) -> Self {
        let table = DataTable {
            id,
            name: name.into(),
            tuples_per_group: config.tuples_per_tile_group.max(1),
            catalog,
            tile_groups: RwLock::new(Vec::new()),
            indexes: RwLock::new(Vec::new()),
            tuple_count: AtomicU64::new(0),
        };
        table.add_tile_group();
        table
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tuple_count(&self) -> u64 {
        self.tuple_count.load(Ordering::Relaxed)
    }

    /// Committed open-ended versions across all groups.
    pub fn active_tuple_count(&self) -> u64 {
        self.tile_groups
            .read()
            .iter()
            .map(|group| group.active_tuple_count() as u64)
            .sum()
    }

    pub fn tile_group_count(&self) -> usize {
        self.tile_groups.read().len()
    }

    /// Group at a stable position in insertion order.
    pub fn tile_group_by_offset(&self, offset: usize) -> Option<Arc<TileGroup>> {
        self.tile_groups.read().get(offset).map(Arc::clone)
    }

    pub fn tile_groups(&self) -> Vec<Arc<TileGroup>> {
        self.tile_groups.read().iter().map(Arc::clone).collect()
    }

    pub fn add_index(&self, index: Arc<dyn Index>, key_of: KeyFn) {
        self.indexes.write().push(RegisteredIndex { index, key_of });
    }

    pub fn index_count(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes
            .read()
            .iter()
            .map(|reg| Arc::clone(&reg.index))
            .collect()
    }

    /// Places `tuple` in a free slot owned by `txn_id` and enters it in
    /// every registered index.
    ///
    /// Index maintenance is all-or-nothing: if any unique index rejects the
    /// key, entries already made are removed, the slot is marked dead, and
    /// the whole insertion fails. On success the new version is still
    /// invisible; it opens for readers when the owning transaction commits.
    pub fn insert_tuple(&self, txn_id: TxnId, tuple: TupleData) -> OspreyResult<ItemPointer> {
        let (group, slot) = self.allocate_slot(tuple.clone());
        group.slot_header(slot).set_owner(txn_id);
        let location = ItemPointer::new(group.id(), slot);

        let indexes = self.indexes.read();
        for (position, reg) in indexes.iter().enumerate() {
            let key = (reg.key_of)(&tuple);
            if reg.index.insert_entry(&key, location) {
                continue;
            }
            // Unwind entries made so far and abandon the slot.
            for settled in indexes.iter().take(position) {
                let settled_key = (settled.key_of)(&tuple);
                settled.index.delete_entry(&settled_key, location);
            }
            group.abort_inserted_tuple(slot);
            debug!(
                table = %self.id,
                index = reg.index.name(),
                "unique index rejected insertion"
            );
            return Err(StorageError::UniqueViolation {
                index: reg.index.name().to_string(),
                key_hex: hex_encode(&key),
            }
            .into());
        }

        Ok(location)
    }

    /// Places `tuple` in a free slot owned by `txn_id`, bypassing index
    /// maintenance. Update paths use this for new versions of rows whose
    /// index entries already exist.
    pub fn acquire_empty_slot(&self, txn_id: TxnId, tuple: TupleData) -> ItemPointer {
        let (group, slot) = self.allocate_slot(tuple);
        group.slot_header(slot).set_owner(txn_id);
        ItemPointer::new(group.id(), slot)
    }

    /// Allocates the empty tail version a delete installs behind the
    /// version it removes. The slot carries no payload, no owner, and no
    /// index entries; it becomes the chain's invalid tail when the delete
    /// commits.
    pub fn insert_empty_version(&self) -> ItemPointer {
        let (group, slot) = self.allocate_slot(TupleData::new());
        ItemPointer::new(group.id(), slot)
    }

    /// Removes `tuple`'s entries from every index. Called by the garbage
    /// collector when it reclaims the version at `location`.
    pub fn remove_index_entries(&self, tuple: &[u8], location: ItemPointer) {
        for reg in self.indexes.read().iter() {
            let key = (reg.key_of)(tuple);
            reg.index.delete_entry(&key, location);
        }
    }

    /// Moves a chain head's entries to its surviving successor, re-keyed
    /// under the successor's payload so later probes and removals derive
    /// the same key. Used when the collector reclaims a superseded head.
    pub fn repoint_index_entries(
        &self,
        old_tuple: &[u8],
        new_tuple: &[u8],
        from: ItemPointer,
        to: ItemPointer,
    ) {
        for reg in self.indexes.read().iter() {
            let old_key = (reg.key_of)(old_tuple);
            if reg.index.delete_entry(&old_key, from) {
                let new_key = (reg.key_of)(new_tuple);
                reg.index.insert_entry(&new_key, to);
            }
        }
    }

    fn allocate_slot(&self, tuple: TupleData) -> (Arc<TileGroup>, u32) {
        loop {
            let active = self.tile_groups.read().last().map(Arc::clone);
            let Some(active) = active else {
                self.add_tile_group();
                continue;
            };
            if let Some(slot) = active.insert_tuple(tuple.clone()) {
                self.tuple_count.fetch_add(1, Ordering::Relaxed);
                return (active, slot);
            }
            self.grow_past(&active);
        }
    }

    /// Grows the table if `full` is still the newest group. Two threads can
    /// race here; the loser sees a fresh tail and retries its insert
    /// instead of allocating a second group.
    fn grow_past(&self, full: &Arc<TileGroup>) {
        let mut groups = self.tile_groups.write();
        if groups.last().is_some_and(|last| last.id() != full.id()) {
            return;
        }
        let id = self.catalog.next_tile_group_id();
        let group = Arc::new(TileGroup::new(id, self.tuples_per_group));
        self.catalog.register_tile_group(Arc::clone(&group));
        debug!(table = %self.id, group = %id, "allocated tile group");
        groups.push(group);
    }

    fn add_tile_group(&self) {
        let id = self.catalog.next_tile_group_id();
        let group = Arc::new(TileGroup::new(id, self.tuples_per_group));
        self.catalog.register_tile_group(Arc::clone(&group));
        debug!(table = %self.id, group = %id, "allocated tile group");
        self.tile_groups.write().push(group);
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        for group in self.tile_groups.read().iter() {
            self.catalog.unregister_tile_group(group.id());
        }
    }
}

impl std::fmt::Debug for DataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tile_groups", &self.tile_group_count())
            .field("tuples", &self.tuple_count())
            .finish()
    }
}
