//! Per-slot MVCC metadata for a tile group.
//!
//! Every tuple slot carries five words of versioning state. The quiescent
//! states a slot can rest in:
//!
//! | owner     | begin    | end      | meaning                          |
//! |-----------|----------|----------|----------------------------------|
//! | `INVALID` | `MAX`    | `MAX`    | free slot / aborted insert       |
//! | `INITIAL` | cid      | `MAX`    | committed, newest version        |
//! | `INITIAL` | cid_a    | cid_b    | committed, closed version        |
//! | `INVALID` | cid      | cid      | delete's empty tail, chain end   |
//!
//! A live transaction id in `owner` marks a slot with an uncommitted write;
//! commit and abort always restore one of the states above.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use osprey_common::types::{CommitId, ItemPointer, TxnId};

/// Versioning metadata for one tuple slot.
///
/// All fields are single-word atomics so visibility checks never take a
/// lock. Ownership transfer is the only compare-exchange; everything else
/// is plain acquire/release.
#[repr(align(64))]
pub struct TupleHeader {
    txn_id: AtomicU64,
    begin_cid: AtomicU64,
    end_cid: AtomicU64,
    /// Packed [`ItemPointer`] to the next-newer version, if any.
    next: AtomicU64,
    /// Packed [`ItemPointer`] to the next-older version, if any.
    prev: AtomicU64,
}

impl TupleHeader {
    fn new() -> Self {
        TupleHeader {
            txn_id: AtomicU64::new(TxnId::INVALID.0),
            begin_cid: AtomicU64::new(CommitId::MAX.0),
            end_cid: AtomicU64::new(CommitId::MAX.0),
            next: AtomicU64::new(ItemPointer::INVALID.to_raw()),
            prev: AtomicU64::new(ItemPointer::INVALID.to_raw()),
        }
    }

    pub fn owner(&self) -> TxnId {
        TxnId(self.txn_id.load(Ordering::Acquire))
    }

    pub fn set_owner(&self, txn_id: TxnId) {
        self.txn_id.store(txn_id.0, Ordering::Release);
    }

    /// Atomically swings `owner` from `expected` to `new`. Returns false if
    /// another transaction got there first.
    pub fn try_set_owner(&self, expected: TxnId, new: TxnId) -> bool {
        self.txn_id
            .compare_exchange(expected.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn begin_cid(&self) -> CommitId {
        CommitId(self.begin_cid.load(Ordering::Acquire))
    }

    pub fn set_begin_cid(&self, cid: CommitId) {
        self.begin_cid.store(cid.0, Ordering::Release);
    }

    pub fn end_cid(&self) -> CommitId {
        CommitId(self.end_cid.load(Ordering::Acquire))
    }

    pub fn set_end_cid(&self, cid: CommitId) {
        self.end_cid.store(cid.0, Ordering::Release);
    }

    pub fn next(&self) -> ItemPointer {
        ItemPointer::from_raw(self.next.load(Ordering::Acquire))
    }

    pub fn set_next(&self, loc: ItemPointer) {
        self.next.store(loc.to_raw(), Ordering::Release);
    }

    pub fn prev(&self) -> ItemPointer {
        ItemPointer::from_raw(self.prev.load(Ordering::Acquire))
    }

    pub fn set_prev(&self, loc: ItemPointer) {
        self.prev.store(loc.to_raw(), Ordering::Release);
    }

    /// Returns the slot to the free state. Only safe once no live snapshot
    /// can still reach this version; the garbage collector is the sole
    /// caller.
    pub fn reset(&self) {
        self.set_owner(TxnId::INVALID);
        self.set_begin_cid(CommitId::MAX);
        self.set_end_cid(CommitId::MAX);
        self.set_next(ItemPointer::INVALID);
        self.set_prev(ItemPointer::INVALID);
    }

    /// Point-in-time copy of all five fields. The fields are read one at a
    /// time, so the result is only a consistent state when the slot is
    /// quiescent (tests, verification, stats).
    pub fn snapshot(&self) -> HeaderSnapshot {
        HeaderSnapshot {
            owner: self.owner(),
            begin_cid: self.begin_cid(),
            end_cid: self.end_cid(),
            next: self.next(),
            prev: self.prev(),
        }
    }
}

/// Plain-value copy of a [`TupleHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSnapshot {
    pub owner: TxnId,
    pub begin_cid: CommitId,
    pub end_cid: CommitId,
    pub next: ItemPointer,
    pub prev: ItemPointer,
}

/// The header array for one tile group, plus the slot allocation cursor.
pub struct TupleHeaderStore {
    headers: Box<[TupleHeader]>,
    next_tuple_slot: AtomicU32,
    capacity: u32,
}

impl TupleHeaderStore {
    pub fn new(capacity: u32) -> Self {
        let headers = (0..capacity).map(|_| TupleHeader::new()).collect();
        TupleHeaderStore {
            headers,
            next_tuple_slot: AtomicU32::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Claims the next unused slot, or `None` once the group is full.
    ///
    /// The cursor only moves forward; slots freed by the garbage collector
    /// are reused through a whole-group recycle, not here.
    pub fn next_empty_slot(&self) -> Option<u32> {
        if self.next_tuple_slot.load(Ordering::Relaxed) >= self.capacity {
            return None;
        }
        let slot = self.next_tuple_slot.fetch_add(1, Ordering::Relaxed);
        if slot < self.capacity {
            Some(slot)
        } else {
            None
        }
    }

    /// Number of slots handed out so far (allocated, not necessarily live).
    pub fn allocated_slots(&self) -> u32 {
        self.next_tuple_slot.load(Ordering::Relaxed).min(self.capacity)
    }

    /// Direct access for slots the caller already knows are in bounds
    /// (slots it allocated itself or recorded in a write set).
    pub fn header(&self, slot: u32) -> &TupleHeader {
        &self.headers[slot as usize]
    }

    /// Bounds-checked access for slot numbers read back from stored
    /// [`ItemPointer`]s.
    pub fn get(&self, slot: u32) -> Option<&TupleHeader> {
        self.headers.get(slot as usize)
    }
}
