//! Fixed-capacity tuple storage unit.
//!
//! A tile group pairs a [`TupleHeaderStore`] with one byte-buffer slot per
//! tuple. Groups are created by the owning table when the active group
//! fills up and are never destroyed mid-flight; individual slots are
//! recycled by the garbage collector once no snapshot can reach them.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use osprey_common::types::{CommitId, TileGroupId, TxnId};

use crate::header::{TupleHeader, TupleHeaderStore};

/// Opaque tuple payload. The concurrency core never inspects the bytes.
pub type TupleData = Vec<u8>;

pub struct TileGroup {
    id: TileGroupId,
    header: TupleHeaderStore,
    data: Box<[RwLock<Option<TupleData>>]>,
    /// Committed versions currently open-ended (`end_cid == MAX`).
    active_tuple_count: AtomicU32,
}

impl TileGroup {
    pub fn new(id: TileGroupId, capacity: u32) -> Self {
        let data = (0..capacity).map(|_| RwLock::new(None)).collect();
        TileGroup {
            id,
            header: TupleHeaderStore::new(capacity),
            data,
            active_tuple_count: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> TileGroupId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.header.capacity()
    }

    /// The per-slot MVCC metadata. The transaction manager mutates headers
    /// directly through this; it is not a general mutation surface.
    pub fn header(&self) -> &TupleHeaderStore {
        &self.header
    }

    pub fn active_tuple_count(&self) -> u32 {
        self.active_tuple_count.load(Ordering::Relaxed)
    }

    /// Stores `tuple` in the next free slot and returns its offset, or
    /// `None` if the group is full and the caller must move on to a fresh
    /// group.
    ///
    /// The slot's header is left in the free placeholder state; the
    /// inserting transaction claims ownership afterwards.
    pub fn insert_tuple(&self, tuple: TupleData) -> Option<u32> {
        let slot = self.header.next_empty_slot()?;

        let header = self.header.header(slot);
        debug_assert_eq!(header.owner(), TxnId::INVALID);
        debug_assert_eq!(header.begin_cid(), CommitId::MAX);
        debug_assert_eq!(header.end_cid(), CommitId::MAX);

        *self.data[slot as usize].write() = Some(tuple);
        Some(slot)
    }

    /// Copies out the payload stored at `slot`, if any.
    pub fn get_tuple(&self, slot: u32) -> Option<TupleData> {
        self.data.get(slot as usize)?.read().clone()
    }

    /// Makes an inserted version durable-visible: validity opens at `cid`
    /// and ownership returns to the pool. The owner word is written last so
    /// a concurrent ownership probe cannot acquire the slot before its
    /// interval is in place.
    pub fn commit_inserted_tuple(&self, slot: u32, txn_id: TxnId, cid: CommitId) {
        let header = self.header.header(slot);
        debug_assert_eq!(header.owner(), txn_id);

        header.set_begin_cid(cid);
        header.set_end_cid(CommitId::MAX);
        header.set_owner(TxnId::INITIAL);
        self.active_tuple_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Discards an uncommitted insert. The slot keeps its `MAX/MAX`
    /// interval so no visibility window ever opens; the garbage collector
    /// reclaims it later.
    pub fn abort_inserted_tuple(&self, slot: u32) {
        let header = self.header.header(slot);
        header.set_owner(TxnId::INVALID);
    }

    /// Closes a version's validity interval at `cid` and returns ownership
    /// to the pool, so snapshots older than `cid` keep reading it. The
    /// chain tail behind it (an update's new version or a delete's empty
    /// tail) is stamped separately by the commit path.
    pub fn commit_deleted_tuple(&self, slot: u32, txn_id: TxnId, cid: CommitId) {
        let header = self.header.header(slot);
        // A slot both inserted and deleted by the same transaction has
        // already been returned to the pool by the insert's commit.
        debug_assert!(header.owner() == txn_id || header.owner() == TxnId::INITIAL);

        header.set_end_cid(cid);
        header.set_owner(TxnId::INITIAL);
        self.active_tuple_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Undoes an uncommitted delete: the interval reopens and ownership
    /// returns to the pool, restoring the version's pre-transaction state.
    pub fn abort_deleted_tuple(&self, slot: u32, txn_id: TxnId) {
        let header = self.header.header(slot);
        debug_assert_eq!(header.owner(), txn_id);

        header.set_end_cid(CommitId::MAX);
        header.set_owner(TxnId::INITIAL);
    }

    /// Clears a slot's payload alongside a header reset. Garbage collector
    /// only.
    pub fn reclaim_tuple(&self, slot: u32) {
        if let Some(cell) = self.data.get(slot as usize) {
            *cell.write() = None;
        }
        if let Some(header) = self.header.get(slot) {
            header.reset();
        }
    }

    /// Convenience accessor used by hot manager paths that already hold a
    /// slot they allocated.
    pub fn slot_header(&self, slot: u32) -> &TupleHeader {
        self.header.header(slot)
    }
}

impl std::fmt::Debug for TileGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileGroup")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("allocated", &self.header.allocated_slots())
            .field("active", &self.active_tuple_count())
            .finish()
    }
}
