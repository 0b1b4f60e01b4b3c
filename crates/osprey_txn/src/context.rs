//! Per-transaction bookkeeping.
//!
//! A context is created at begin, mutated only by its owning execution
//! thread while the transaction runs, and shared with the manager's
//! pending-commit list during the commit phase. The `Arc` handles held by
//! that list and by the live-transaction table are what keep a context
//! alive until both have let go.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use osprey_common::types::{CommitId, TileGroupId, TxnId};
use osprey_storage::tile_group::TileGroup;

/// Slot offsets a transaction touched within one tile group, together with
/// the group handle so commit never goes back through the directory.
#[derive(Clone)]
pub struct GroupSlots {
    pub group: Arc<TileGroup>,
    pub slots: Vec<u32>,
}

#[derive(Default)]
struct SlotSets {
    inserted: HashMap<TileGroupId, GroupSlots>,
    deleted: HashMap<TileGroupId, GroupSlots>,
    read: HashMap<TileGroupId, GroupSlots>,
}

impl SlotSets {
    fn record(
        map: &mut HashMap<TileGroupId, GroupSlots>,
        group: &Arc<TileGroup>,
        slot: u32,
    ) {
        map.entry(group.id())
            .or_insert_with(|| GroupSlots {
                group: Arc::clone(group),
                slots: Vec::new(),
            })
            .slots
            .push(slot);
    }
}

pub struct TransactionContext {
    txn_id: TxnId,
    /// Begin snapshot while running; replaced by the candidate commit id
    /// when the transaction enters the commit phase.
    cid: AtomicU64,
    slot_sets: Mutex<SlotSets>,
    /// Successor on the pending-commit list. Written once, at splice.
    next: RwLock<Option<Arc<TransactionContext>>>,
    /// Set when this transaction lost the watermark race and is waiting
    /// for a predecessor to finalize it.
    waiting_to_commit: AtomicBool,
}

impl TransactionContext {
    pub fn new(txn_id: TxnId, begin_cid: CommitId) -> Self {
        TransactionContext {
            txn_id,
            cid: AtomicU64::new(begin_cid.0),
            slot_sets: Mutex::new(SlotSets::default()),
            next: RwLock::new(None),
            waiting_to_commit: AtomicBool::new(false),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn cid(&self) -> CommitId {
        CommitId(self.cid.load(Ordering::Acquire))
    }

    pub fn set_cid(&self, cid: CommitId) {
        self.cid.store(cid.0, Ordering::Release);
    }

    pub fn record_insert(&self, group: &Arc<TileGroup>, slot: u32) {
        let mut sets = self.slot_sets.lock();
        SlotSets::record(&mut sets.inserted, group, slot);
    }

    pub fn record_delete(&self, group: &Arc<TileGroup>, slot: u32) {
        let mut sets = self.slot_sets.lock();
        SlotSets::record(&mut sets.deleted, group, slot);
    }

    pub fn record_read(&self, group: &Arc<TileGroup>, slot: u32) {
        let mut sets = self.slot_sets.lock();
        SlotSets::record(&mut sets.read, group, slot);
    }

    /// Snapshot of the insert set. Taken during commit and abort, after
    /// the transaction has stopped issuing writes.
    pub fn inserted_tuples(&self) -> Vec<GroupSlots> {
        self.slot_sets.lock().inserted.values().cloned().collect()
    }

    pub fn deleted_tuples(&self) -> Vec<GroupSlots> {
        self.slot_sets.lock().deleted.values().cloned().collect()
    }

    pub fn read_tuples(&self) -> Vec<GroupSlots> {
        self.slot_sets.lock().read.values().cloned().collect()
    }

    pub fn insert_count(&self) -> usize {
        self.slot_sets
            .lock()
            .inserted
            .values()
            .map(|entry| entry.slots.len())
            .sum()
    }

    pub fn delete_count(&self) -> usize {
        self.slot_sets
            .lock()
            .deleted
            .values()
            .map(|entry| entry.slots.len())
            .sum()
    }

    /// Drops all recorded slot sets. Called once commit or abort has
    /// applied them.
    pub fn reset_states(&self) {
        let mut sets = self.slot_sets.lock();
        sets.inserted.clear();
        sets.deleted.clear();
        sets.read.clear();
    }

    pub fn next(&self) -> Option<Arc<TransactionContext>> {
        self.next.read().clone()
    }

    pub fn set_next(&self, successor: Arc<TransactionContext>) {
        *self.next.write() = Some(successor);
    }

    pub fn set_waiting_to_commit(&self, waiting: bool) {
        self.waiting_to_commit.store(waiting, Ordering::Release);
    }

    pub fn is_waiting_to_commit(&self) -> bool {
        self.waiting_to_commit.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .field("cid", &self.cid())
            .field("inserts", &self.insert_count())
            .field("deletes", &self.delete_count())
            .field("waiting_to_commit", &self.is_waiting_to_commit())
            .finish()
    }
}
