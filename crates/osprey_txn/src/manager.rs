//! Transaction lifecycle and the commit-ordering protocol.
//!
//! One manager instance drives every transaction in the process. It hands
//! out transaction ids, decides version visibility, arbitrates write
//! ownership through a single compare-and-swap on the tuple header's owner
//! word, and assigns the global commit order. Commit work runs in parallel
//! across threads; only the watermark advance is serialized, and even that
//! hand-off self-heals: a committer that cannot advance the watermark yet
//! is finalized later by its predecessor's walk down the pending-commit
//! list.
//!
//! The live-transaction table and the pending-list tail share one mutex.
//! Tuple headers are never touched under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use osprey_common::error::{OspreyResult, StorageError, TxnError};
use osprey_common::types::{CommitId, ItemPointer, TxnId};
use osprey_storage::catalog::Catalog;
use osprey_storage::gc::SafepointProvider;
use osprey_storage::header::TupleHeader;
use osprey_storage::logging::{LogManager, LogRecord};
use osprey_storage::table::DataTable;
use osprey_storage::tile_group::{TileGroup, TupleData};

use crate::context::TransactionContext;

/// First id handed to a client transaction; 0 and 1 are reserved owners.
const FIRST_TXN_ID: u64 = 2;

/// Registry half of the manager: the live-transaction table plus the tail
/// of the pending-commit list. Guarded together so a registration and a
/// commit splice can never interleave.
#[derive(Default)]
struct ManagerState {
    txn_table: HashMap<TxnId, Arc<TransactionContext>>,
    last_txn: Option<Arc<TransactionContext>>,
}

#[derive(Default)]
struct TxnStatsCollector {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    write_conflicts: AtomicU64,
}

impl TxnStatsCollector {
    fn record_begin(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn base_snapshot(&self) -> TxnStatsSnapshot {
        TxnStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            active_count: 0,
            last_cid: CommitId::INVALID,
        }
    }
}

/// Point-in-time view of the manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnStatsSnapshot {
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub write_conflicts: u64,
    pub active_count: usize,
    pub last_cid: CommitId,
}

pub struct TransactionManager {
    /// Next transaction id to hand out.
    next_txn_id: AtomicU64,
    /// Highest commit id fully and irrevocably finished. Snapshot reads of
    /// this watermark become transaction begin points. Candidate ids above
    /// it live only in the pending-commit list.
    last_cid: AtomicU64,
    state: Mutex<ManagerState>,
    catalog: Arc<Catalog>,
    log_manager: Arc<LogManager>,
    stats: TxnStatsCollector,
}

impl TransactionManager {
    pub fn new(catalog: Arc<Catalog>, log_manager: Arc<LogManager>) -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(FIRST_TXN_ID),
            last_cid: AtomicU64::new(CommitId::START.0),
            state: Mutex::new(ManagerState::default()),
            catalog,
            log_manager,
            stats: TxnStatsCollector::default(),
        }
    }

    /// Starts a transaction: allocates an id, snapshots the watermark as
    /// its begin point, and registers it in the live table.
    pub fn begin_transaction(&self) -> OspreyResult<Arc<TransactionContext>> {
        let raw = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        if raw >= TxnId::MAX.0 {
            return Err(TxnError::TxnIdSpaceExhausted.into());
        }
        let txn_id = TxnId(raw);

        // Snapshot and registration are one step under the state mutex: a
        // concurrent safepoint scan either counts this transaction or took
        // its quiesced bound from a watermark no newer than this snapshot.
        let txn = {
            let mut state = self.state.lock();
            let begin_cid = CommitId(self.last_cid.load(Ordering::Acquire));
            let txn = Arc::new(TransactionContext::new(txn_id, begin_cid));
            state.txn_table.insert(txn_id, Arc::clone(&txn));
            txn
        };

        self.log_manager.log(LogRecord::Begin { txn_id });
        self.stats.record_begin();
        debug!("TXN begin: {} at {}", txn_id, txn.cid());
        Ok(txn)
    }

    /// Snapshot-visibility predicate.
    ///
    /// The running transaction sees exactly one of the versions it owns:
    /// its fresh insert, recognizable by the unopened `MAX` begin point.
    /// Versions owned by another in-flight writer stay visible by interval
    /// while that writer's delete is uncommitted, but its uncommitted
    /// insert is never readable since cascading aborts are not supported.
    pub fn is_visible(&self, txn: &TransactionContext, header: &TupleHeader) -> bool {
        let snap = header.snapshot();
        if snap.owner == TxnId::INVALID {
            return false;
        }
        if snap.owner == txn.txn_id() {
            return snap.begin_cid == CommitId::MAX && snap.end_cid != CommitId::INVALID;
        }
        if snap.owner != TxnId::INITIAL && snap.begin_cid == CommitId::MAX {
            return false;
        }
        let at = txn.cid();
        snap.begin_cid <= at && at < snap.end_cid
    }

    pub fn is_owner(&self, txn: &TransactionContext, header: &TupleHeader) -> bool {
        header.owner() == txn.txn_id()
    }

    /// True when the version is committed, open-ended, and owned by
    /// nobody, so a writer may try to claim it.
    pub fn is_ownable(&self, header: &TupleHeader) -> bool {
        header.owner() == TxnId::INITIAL && header.end_cid() == CommitId::MAX
    }

    /// Claims write ownership of a version. Exactly one of any number of
    /// racing writers wins the compare-exchange; every loser must abort
    /// its transaction.
    pub fn acquire_ownership(
        &self,
        txn: &TransactionContext,
        header: &TupleHeader,
    ) -> OspreyResult<()> {
        if header.try_set_owner(TxnId::INITIAL, txn.txn_id()) {
            return Ok(());
        }
        self.stats.record_conflict();
        debug!("TXN conflict: {} lost ownership race", txn.txn_id());
        Err(TxnError::WriteConflict(txn.txn_id()).into())
    }

    /// Inserts a fresh tuple through the table (slot claim plus index
    /// maintenance) and records it in the transaction's insert set.
    pub fn insert_tuple(
        &self,
        txn: &TransactionContext,
        table: &DataTable,
        tuple: TupleData,
    ) -> OspreyResult<ItemPointer> {
        let location = table.insert_tuple(txn.txn_id(), tuple)?;
        let group = self.catalog.tile_group_for(location)?;
        txn.record_insert(&group, location.offset);
        Ok(location)
    }

    /// Resolves a caller-supplied location to its tile group, rejecting
    /// offsets past the group's slot array. A stale or corrupt pointer
    /// surfaces as [`StorageError::SlotOutOfBounds`] instead of a panic in
    /// the header store.
    fn resolve(&self, location: ItemPointer) -> OspreyResult<Arc<TileGroup>> {
        let group = self.catalog.tile_group_for(location)?;
        if group.header().get(location.offset).is_none() {
            return Err(StorageError::SlotOutOfBounds {
                slot: location.offset,
                capacity: group.capacity(),
            }
            .into());
        }
        Ok(group)
    }

    /// Marks the version at `location` deleted by `txn` and installs the
    /// empty tail version behind it. The old version's validity interval
    /// is left untouched until commit, so other snapshots keep reading it;
    /// abort restores it unchanged and abandons the tail slot as a dead
    /// placeholder. Deleting a version this transaction has already
    /// written through is a conflict.
    pub fn delete_tuple(
        &self,
        txn: &TransactionContext,
        table: &DataTable,
        location: ItemPointer,
    ) -> OspreyResult<()> {
        let group = self.resolve(location)?;
        let header = group.slot_header(location.offset);

        if !self.is_owner(txn, header) {
            if !self.is_ownable(header) {
                self.stats.record_conflict();
                return Err(TxnError::WriteConflict(txn.txn_id()).into());
            }
            self.acquire_ownership(txn, header)?;
        } else if !header.next().is_null() {
            // Already written through in this transaction; the installed
            // successor is the only one this version gets.
            self.stats.record_conflict();
            return Err(TxnError::WriteConflict(txn.txn_id()).into());
        }

        let tail = table.insert_empty_version();
        let tail_group = self.catalog.tile_group_for(tail)?;
        tail_group.slot_header(tail.offset).set_prev(location);
        header.set_next(tail);

        txn.record_delete(&group, location.offset);
        Ok(())
    }

    /// Installs a new version of the tuple at `old`: claims the old
    /// version, allocates a fresh slot without re-entering the indexes,
    /// and links the two into the version chain. The transaction records
    /// a delete of the old version and an insert of the new one, so commit
    /// and abort need no update-specific handling. Chained writes go
    /// through the returned location; writing `old` a second time is a
    /// conflict.
    pub fn perform_update(
        &self,
        txn: &TransactionContext,
        table: &DataTable,
        old: ItemPointer,
        tuple: TupleData,
    ) -> OspreyResult<ItemPointer> {
        let old_group = self.resolve(old)?;
        let old_header = old_group.slot_header(old.offset);

        if !self.is_owner(txn, old_header) {
            if !self.is_ownable(old_header) {
                self.stats.record_conflict();
                return Err(TxnError::WriteConflict(txn.txn_id()).into());
            }
            self.acquire_ownership(txn, old_header)?;
        } else if !old_header.next().is_null() {
            // Already written through in this transaction; the installed
            // successor is the only one this version gets.
            self.stats.record_conflict();
            return Err(TxnError::WriteConflict(txn.txn_id()).into());
        }

        let new = table.acquire_empty_slot(txn.txn_id(), tuple);
        let new_group = self.catalog.tile_group_for(new)?;

        // Back link before forward link: once old.next is published the
        // new version is reachable and must already point home.
        new_group.slot_header(new.offset).set_prev(old);
        old_header.set_next(new);

        txn.record_delete(&old_group, old.offset);
        txn.record_insert(&new_group, new.offset);
        Ok(new)
    }

    /// Reads the tuple at `location` if it is visible to `txn`, recording
    /// the read in the transaction's read set.
    pub fn read_tuple(
        &self,
        txn: &TransactionContext,
        location: ItemPointer,
    ) -> OspreyResult<Option<TupleData>> {
        let group = self.resolve(location)?;
        if !self.is_visible(txn, group.slot_header(location.offset)) {
            return Ok(None);
        }
        txn.record_read(&group, location.offset);
        Ok(group.get_tuple(location.offset))
    }

    /// Heap scan returning every version of `table` visible to `txn`.
    pub fn scan_visible(
        &self,
        txn: &TransactionContext,
        table: &DataTable,
    ) -> Vec<(ItemPointer, TupleData)> {
        let mut out = Vec::new();
        for group in table.tile_groups() {
            for slot in 0..group.header().allocated_slots() {
                if !self.is_visible(txn, group.slot_header(slot)) {
                    continue;
                }
                if let Some(tuple) = group.get_tuple(slot) {
                    txn.record_read(&group, slot);
                    out.push((ItemPointer::new(group.id(), slot), tuple));
                }
            }
        }
        out
    }

    /// Commits `txn`, returning its final commit id.
    ///
    /// Three phases. The splice assigns a candidate id and links the
    /// context behind the previous committer; modification stamping then
    /// runs outside any lock; the watermark CAS finalizes the id, or
    /// leaves the context flagged for a predecessor to finalize in its
    /// wake. Deregistration is unconditional: even a transaction whose
    /// watermark advance is still pending has irrevocably committed.
    pub fn commit_transaction(&self, txn: &Arc<TransactionContext>) -> OspreyResult<CommitId> {
        let cid = self.begin_commit_phase(txn)?;
        self.commit_modifications(txn, cid);
        self.end_commit_phase(txn, cid);
        self.end_transaction(txn)?;
        // The pending-commit list may still pin the context; the successor
        // walk only reads its cid and flag, so the slot sets go now.
        txn.reset_states();

        self.stats.record_commit();
        debug!("TXN commit: {} at {}", txn.txn_id(), cid);
        Ok(cid)
    }

    /// Rolls back `txn`: every header mutation is reversed before the
    /// live-table entry is released, so no thread can observe a
    /// half-aborted transaction. Aborting an already-deregistered
    /// transaction is a no-op. No commit id is ever assigned.
    pub fn abort_transaction(&self, txn: &Arc<TransactionContext>) -> OspreyResult<()> {
        if !self.state.lock().txn_table.contains_key(&txn.txn_id()) {
            debug!("TXN abort: {} already deregistered", txn.txn_id());
            return Ok(());
        }

        // Deletes are restored before inserts are invalidated so a slot in
        // both sets ends as a dead placeholder, not a resurrected version.
        for entry in txn.deleted_tuples() {
            for &slot in &entry.slots {
                entry.group.abort_deleted_tuple(slot, txn.txn_id());
            }
        }
        for entry in txn.inserted_tuples() {
            for &slot in &entry.slots {
                entry.group.abort_inserted_tuple(slot);
            }
        }

        self.log_manager.log(LogRecord::Abort {
            txn_id: txn.txn_id(),
        });
        self.end_transaction(txn)?;
        txn.reset_states();

        self.stats.record_abort();
        debug!("TXN abort: {}", txn.txn_id());
        Ok(())
    }

    /// Splices `txn` onto the pending-commit list and assigns its
    /// candidate commit id, one past its predecessor's. The two clones
    /// are what keep the context alive for the successor walk after it
    /// leaves the live table.
    fn begin_commit_phase(&self, txn: &Arc<TransactionContext>) -> OspreyResult<CommitId> {
        let mut state = self.state.lock();
        if !state.txn_table.contains_key(&txn.txn_id()) {
            return Err(TxnError::NotFound(txn.txn_id()).into());
        }

        let cid = match &state.last_txn {
            Some(prev) => prev.cid().next(),
            None => CommitId(self.last_cid.load(Ordering::Acquire) + 1),
        };
        txn.set_cid(cid);
        if let Some(prev) = &state.last_txn {
            prev.set_next(Arc::clone(txn));
        }
        state.last_txn = Some(Arc::clone(txn));
        Ok(cid)
    }

    /// Stamps every touched header with the commit id: inserts open their
    /// validity interval at `cid`, deletes close theirs. Runs without any
    /// manager lock; the slot ops are per-header atomics.
    fn commit_modifications(&self, txn: &TransactionContext, cid: CommitId) {
        for entry in txn.inserted_tuples() {
            for &slot in &entry.slots {
                entry.group.commit_inserted_tuple(slot, txn.txn_id(), cid);
            }
        }
        for entry in txn.deleted_tuples() {
            for &slot in &entry.slots {
                entry.group.commit_deleted_tuple(slot, txn.txn_id(), cid);
                self.stamp_delete_tail(entry.group.slot_header(slot).next(), cid);
            }
        }

        self.log_manager.log(LogRecord::Commit {
            txn_id: txn.txn_id(),
            cid,
        });
        if self.log_manager.is_in_logging_mode() && self.log_manager.sync_commit() {
            self.log_manager.wait_for_flush();
        }
    }

    /// Seals the empty tail version behind a committed delete with the
    /// interval `[cid, cid)`, keeping its `INVALID` owner. The seam stays
    /// stitched to the closed version in front of it, and the collector
    /// can reclaim the tail once the safepoint passes `cid`. An update's
    /// successor was already stamped through the insert set and is skipped
    /// by the owner check.
    fn stamp_delete_tail(&self, tail: ItemPointer, cid: CommitId) {
        if tail.is_null() {
            return;
        }
        let Ok(group) = self.catalog.tile_group_for(tail) else {
            return;
        };
        let header = group.slot_header(tail.offset);
        if header.owner() != TxnId::INVALID {
            return;
        }
        header.set_begin_cid(cid);
        header.set_end_cid(cid);
    }

    /// Advances the watermark past `cid` if the predecessor has finished,
    /// then finalizes any flagged successors. On failure the context is
    /// flagged and the CAS retried once, covering the race where the
    /// predecessor finished between the first attempt and the flag write;
    /// if both attempts lose, the predecessor's walk finalizes this
    /// transaction instead.
    fn end_commit_phase(&self, txn: &Arc<TransactionContext>, cid: CommitId) {
        if self.try_finalize(cid) {
            self.finalize_successors(txn);
            return;
        }

        txn.set_waiting_to_commit(true);
        if self.try_finalize(cid) {
            txn.set_waiting_to_commit(false);
            self.finalize_successors(txn);
        }
    }

    fn try_finalize(&self, cid: CommitId) -> bool {
        self.last_cid
            .compare_exchange(cid.0 - 1, cid.0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Walks the pending-commit list behind `txn`, advancing the watermark
    /// for every successor that is already waiting. Stops at the first
    /// successor still committing (it will advance itself) or at a lost
    /// CAS (someone else finalized it first).
    fn finalize_successors(&self, txn: &Arc<TransactionContext>) {
        let mut cursor = txn.next();
        while let Some(succ) = cursor {
            if !succ.is_waiting_to_commit() || !self.try_finalize(succ.cid()) {
                break;
            }
            succ.set_waiting_to_commit(false);
            debug!("TXN finalized in wake: {} at {}", succ.txn_id(), succ.cid());
            cursor = succ.next();
        }
    }

    /// Removes `txn` from the live table and emits its END record. The
    /// pending-commit list may still hold the context afterwards; the last
    /// handle drops once its predecessor's walk lets go.
    fn end_transaction(&self, txn: &Arc<TransactionContext>) -> OspreyResult<()> {
        let removed = self.state.lock().txn_table.remove(&txn.txn_id());
        if removed.is_none() {
            return Err(TxnError::NotFound(txn.txn_id()).into());
        }
        self.log_manager.log(LogRecord::End {
            txn_id: txn.txn_id(),
        });
        Ok(())
    }

    /// Oldest commit id any live transaction can still read at, or one
    /// past the watermark when none is running. Versions closed strictly
    /// below this point are invisible to every present and future
    /// transaction, which makes it the garbage collector's safepoint.
    pub fn oldest_active_cid(&self) -> CommitId {
        let state = self.state.lock();
        state
            .txn_table
            .values()
            .map(|txn| txn.cid())
            .min()
            .unwrap_or_else(|| CommitId(self.last_cid.load(Ordering::Acquire) + 1))
    }

    /// Ids of every live transaction, for the chain verifier.
    pub fn live_txn_ids(&self) -> Vec<TxnId> {
        self.state.lock().txn_table.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().txn_table.len()
    }

    pub fn last_cid(&self) -> CommitId {
        CommitId(self.last_cid.load(Ordering::Acquire))
    }

    pub fn stats_snapshot(&self) -> TxnStatsSnapshot {
        let mut snapshot = self.stats.base_snapshot();
        snapshot.active_count = self.active_count();
        snapshot.last_cid = self.last_cid();
        snapshot
    }

    /// Reinitializes counters and drops every live transaction. Intended
    /// for tests and recovery bring-up, never for a running system.
    pub fn reset_states(&self) {
        let mut state = self.state.lock();
        state.txn_table.clear();
        state.last_txn = None;
        self.next_txn_id.store(FIRST_TXN_ID, Ordering::SeqCst);
        self.last_cid.store(CommitId::START.0, Ordering::SeqCst);
    }
}

impl SafepointProvider for TransactionManager {
    fn safepoint(&self) -> CommitId {
        self.oldest_active_cid()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::Relaxed))
            .field("last_cid", &self.last_cid())
            .field("active", &self.active_count())
            .finish()
    }
}
