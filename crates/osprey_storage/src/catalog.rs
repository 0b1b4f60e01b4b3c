//! Process-wide tile group directory.
//!
//! Version chains cross tile group boundaries, so any component holding an
//! [`ItemPointer`] needs a way back to the group it names. The catalog is
//! that directory, plus the allocator for storage object ids.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use osprey_common::error::{OspreyResult, StorageError};
use osprey_common::types::{ItemPointer, TableId, TileGroupId};

use crate::tile_group::TileGroup;

pub struct Catalog {
    tile_groups: DashMap<TileGroupId, Arc<TileGroup>>,
    next_oid: AtomicU32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            tile_groups: DashMap::new(),
            // Object ids start at 1; the all-ones pattern is reserved for
            // the invalid id.
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn next_tile_group_id(&self) -> TileGroupId {
        TileGroupId(self.next_oid.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_table_id(&self) -> TableId {
        TableId(self.next_oid.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register_tile_group(&self, group: Arc<TileGroup>) {
        self.tile_groups.insert(group.id(), group);
    }

    pub fn tile_group(&self, id: TileGroupId) -> OspreyResult<Arc<TileGroup>> {
        self.tile_groups
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::TileGroupNotFound(id).into())
    }

    pub fn try_tile_group(&self, id: TileGroupId) -> Option<Arc<TileGroup>> {
        self.tile_groups.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolves a version link to its tile group. Null pointers are the
    /// caller's job to check first.
    pub fn tile_group_for(&self, loc: ItemPointer) -> OspreyResult<Arc<TileGroup>> {
        self.tile_group(loc.tile_group)
    }

    /// Drops a group from the directory. Only the owning table calls this,
    /// and only at table drop.
    pub fn unregister_tile_group(&self, id: TileGroupId) {
        self.tile_groups.remove(&id);
    }

    pub fn tile_group_count(&self) -> usize {
        self.tile_groups.len()
    }

    /// Snapshot of all registered groups, for sweep-style iteration.
    pub fn tile_groups(&self) -> Vec<Arc<TileGroup>> {
        self.tile_groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
