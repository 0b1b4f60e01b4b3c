#[cfg(test)]
mod tile_group_tests {
    use crate::tile_group::TileGroup;
    use osprey_common::types::{CommitId, ItemPointer, TileGroupId, TxnId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn group(capacity: u32) -> TileGroup {
        TileGroup::new(TileGroupId(1), capacity)
    }

    #[test]
    fn test_insert_leaves_placeholder_header() {
        let tg = group(4);
        let slot = tg.insert_tuple(b"alpha".to_vec()).unwrap();

        let snap = tg.slot_header(slot).snapshot();
        assert_eq!(snap.owner, TxnId::INVALID);
        assert_eq!(snap.begin_cid, CommitId::MAX);
        assert_eq!(snap.end_cid, CommitId::MAX);
        assert_eq!(tg.get_tuple(slot).unwrap(), b"alpha".to_vec());
    }

    #[test]
    fn test_group_fills_at_capacity() {
        let tg = group(3);
        assert_eq!(tg.insert_tuple(b"a".to_vec()), Some(0));
        assert_eq!(tg.insert_tuple(b"b".to_vec()), Some(1));
        assert_eq!(tg.insert_tuple(b"c".to_vec()), Some(2));
        assert_eq!(tg.insert_tuple(b"d".to_vec()), None);
        // Rejection is stable, not transient
        assert_eq!(tg.insert_tuple(b"e".to_vec()), None);
        assert_eq!(tg.header().allocated_slots(), 3);
    }

    #[test]
    fn test_commit_inserted_opens_interval() {
        let tg = group(2);
        let slot = tg.insert_tuple(b"row".to_vec()).unwrap();
        tg.slot_header(slot).set_owner(TxnId(7));

        tg.commit_inserted_tuple(slot, TxnId(7), CommitId(5));

        let snap = tg.slot_header(slot).snapshot();
        assert_eq!(snap.owner, TxnId::INITIAL);
        assert_eq!(snap.begin_cid, CommitId(5));
        assert_eq!(snap.end_cid, CommitId::MAX);
        assert_eq!(tg.active_tuple_count(), 1);
    }

    #[test]
    fn test_abort_inserted_never_opens_window() {
        let tg = group(2);
        let slot = tg.insert_tuple(b"row".to_vec()).unwrap();
        tg.slot_header(slot).set_owner(TxnId(7));

        tg.abort_inserted_tuple(slot);

        let snap = tg.slot_header(slot).snapshot();
        assert_eq!(snap.owner, TxnId::INVALID);
        assert_eq!(snap.begin_cid, CommitId::MAX);
        assert_eq!(snap.end_cid, CommitId::MAX);
        assert_eq!(tg.active_tuple_count(), 0);
    }

    #[test]
    fn test_commit_deleted_closes_interval() {
        let tg = group(2);
        let slot = tg.insert_tuple(b"row".to_vec()).unwrap();
        tg.slot_header(slot).set_owner(TxnId(7));
        tg.commit_inserted_tuple(slot, TxnId(7), CommitId(5));

        assert!(tg.slot_header(slot).try_set_owner(TxnId::INITIAL, TxnId(9)));
        tg.commit_deleted_tuple(slot, TxnId(9), CommitId(8));

        // The closed version returns to the pool so older snapshots can
        // still read it.
        let snap = tg.slot_header(slot).snapshot();
        assert_eq!(snap.owner, TxnId::INITIAL);
        assert_eq!(snap.begin_cid, CommitId(5));
        assert_eq!(snap.end_cid, CommitId(8));
        assert_eq!(tg.active_tuple_count(), 0);
    }

    #[test]
    fn test_commit_deleted_with_successor_returns_to_pool() {
        let tg = group(2);
        let old = tg.insert_tuple(b"v1".to_vec()).unwrap();
        tg.slot_header(old).set_owner(TxnId(7));
        tg.commit_inserted_tuple(old, TxnId(7), CommitId(5));

        // An update linked a successor before commit.
        assert!(tg.slot_header(old).try_set_owner(TxnId::INITIAL, TxnId(9)));
        let newer = tg.insert_tuple(b"v2".to_vec()).unwrap();
        tg.slot_header(newer).set_owner(TxnId(9));
        tg.slot_header(old).set_next(ItemPointer::new(tg.id(), newer));
        tg.slot_header(newer).set_prev(ItemPointer::new(tg.id(), old));

        tg.commit_deleted_tuple(old, TxnId(9), CommitId(8));
        tg.commit_inserted_tuple(newer, TxnId(9), CommitId(8));

        let snap = tg.slot_header(old).snapshot();
        assert_eq!(snap.owner, TxnId::INITIAL);
        assert_eq!(snap.end_cid, CommitId(8));
        // One superseded, one new: still one live version.
        assert_eq!(tg.active_tuple_count(), 1);
    }

    #[test]
    fn test_abort_deleted_restores_version() {
        let tg = group(2);
        let slot = tg.insert_tuple(b"row".to_vec()).unwrap();
        tg.slot_header(slot).set_owner(TxnId(7));
        tg.commit_inserted_tuple(slot, TxnId(7), CommitId(5));

        assert!(tg.slot_header(slot).try_set_owner(TxnId::INITIAL, TxnId(9)));
        tg.abort_deleted_tuple(slot, TxnId(9));

        let snap = tg.slot_header(slot).snapshot();
        assert_eq!(snap.owner, TxnId::INITIAL);
        assert_eq!(snap.begin_cid, CommitId(5));
        assert_eq!(snap.end_cid, CommitId::MAX);
        assert_eq!(tg.active_tuple_count(), 1);
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let tg = Arc::new(group(100));
        let successes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for t in 0..4u32 {
            let tg = Arc::clone(&tg);
            let successes = Arc::clone(&successes);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u32 {
                    let payload = format!("t{}-{}", t, i).into_bytes();
                    if tg.insert_tuple(payload).is_some() {
                        successes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 200 attempts against 100 slots: exactly the capacity succeeds.
        assert_eq!(successes.load(Ordering::Relaxed), 100);
        assert_eq!(tg.header().allocated_slots(), 100);
        assert_eq!(tg.insert_tuple(b"late".to_vec()), None);
    }
}

#[cfg(test)]
mod table_tests {
    use crate::catalog::Catalog;
    use crate::index::{BTreeIndex, Index};
    use crate::table::{identity_key, DataTable};
    use osprey_common::config::StorageConfig;
    use osprey_common::error::{OspreyError, StorageError};
    use osprey_common::types::TxnId;
    use std::sync::Arc;

    fn setup() -> (Arc<Catalog>, DataTable) {
        let catalog = Arc::new(Catalog::new());
        let table = DataTable::new(
            catalog.next_table_id(),
            "accounts",
            StorageConfig {
                tuples_per_tile_group: 2,
            },
            Arc::clone(&catalog),
        );
        (catalog, table)
    }

    #[test]
    fn test_table_grows_when_group_fills() {
        let (_catalog, table) = setup();
        assert_eq!(table.tile_group_count(), 1);

        for i in 0..5u32 {
            let loc = table.acquire_empty_slot(TxnId(3), vec![i as u8]);
            assert!(!loc.is_null());
        }

        // Five tuples across groups of two.
        assert_eq!(table.tile_group_count(), 3);
        assert_eq!(table.tuple_count(), 5);
    }

    #[test]
    fn test_group_offsets_are_stable() {
        let (_catalog, table) = setup();
        let first = table.tile_group_by_offset(0).unwrap().id();

        for i in 0..6u32 {
            table.acquire_empty_slot(TxnId(3), vec![i as u8]);
        }

        assert_eq!(table.tile_group_by_offset(0).unwrap().id(), first);
        assert!(table.tile_group_by_offset(table.tile_group_count()).is_none());
    }

    #[test]
    fn test_insert_enters_every_index() {
        let (_catalog, table) = setup();
        let by_payload = Arc::new(BTreeIndex::new("by_payload", false));
        table.add_index(by_payload.clone(), identity_key());

        let loc = table.insert_tuple(TxnId(3), b"k1".to_vec()).unwrap();

        assert_eq!(by_payload.scan_key(b"k1"), vec![loc]);
        let owner = {
            let group = table.tile_group_by_offset(0).unwrap();
            group.slot_header(loc.offset).owner()
        };
        assert_eq!(owner, TxnId(3));
    }

    #[test]
    fn test_unique_violation_rolls_back_all_entries() {
        let (_catalog, table) = setup();
        let first = Arc::new(BTreeIndex::new("first", false));
        let unique = Arc::new(BTreeIndex::new("unique", true));
        table.add_index(first.clone(), identity_key());
        table.add_index(unique.clone(), identity_key());

        let loc = table.insert_tuple(TxnId(3), b"dup".to_vec()).unwrap();
        let err = table.insert_tuple(TxnId(4), b"dup".to_vec()).unwrap_err();

        match err {
            OspreyError::Storage(StorageError::UniqueViolation { index, .. }) => {
                assert_eq!(index, "unique");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The non-unique index kept only the original entry, and the
        // abandoned slot is dead.
        assert_eq!(first.scan_key(b"dup"), vec![loc]);
        assert_eq!(unique.scan_key(b"dup"), vec![loc]);
        assert_eq!(first.entry_count(), 1);
        let dead = table
            .tile_groups()
            .iter()
            .flat_map(|group| {
                (0..group.header().allocated_slots())
                    .map(|slot| group.slot_header(slot).owner())
                    .collect::<Vec<_>>()
            })
            .filter(|owner| *owner == TxnId::INVALID)
            .count();
        assert_eq!(dead, 1);
    }

    #[test]
    fn test_acquire_empty_slot_bypasses_indexes() {
        let (_catalog, table) = setup();
        let unique = Arc::new(BTreeIndex::new("unique", true));
        table.add_index(unique.clone(), identity_key());

        table.insert_tuple(TxnId(3), b"same".to_vec()).unwrap();
        // Update path places a second version with the same key bytes.
        let loc = table.acquire_empty_slot(TxnId(4), b"same".to_vec());

        assert!(!loc.is_null());
        assert_eq!(unique.entry_count(), 1);
    }

    #[test]
    fn test_drop_unregisters_groups() {
        let (catalog, table) = setup();
        for i in 0..5u32 {
            table.acquire_empty_slot(TxnId(3), vec![i as u8]);
        }
        let count = table.tile_group_count();
        assert_eq!(catalog.tile_group_count(), count);

        drop(table);
        assert_eq!(catalog.tile_group_count(), 0);
    }
}

#[cfg(test)]
mod index_tests {
    use crate::index::{BTreeIndex, Index};
    use osprey_common::types::{ItemPointer, TileGroupId};

    fn loc(group: u32, offset: u32) -> ItemPointer {
        ItemPointer::new(TileGroupId(group), offset)
    }

    #[test]
    fn test_insert_scan_delete() {
        let index = BTreeIndex::new("ix", false);
        assert!(index.insert_entry(b"k", loc(1, 0)));
        assert!(index.insert_entry(b"k", loc(1, 1)));

        assert_eq!(index.scan_key(b"k"), vec![loc(1, 0), loc(1, 1)]);
        assert_eq!(index.entry_count(), 2);

        assert!(index.delete_entry(b"k", loc(1, 0)));
        assert!(!index.delete_entry(b"k", loc(1, 0)));
        assert_eq!(index.scan_key(b"k"), vec![loc(1, 1)]);
    }

    #[test]
    fn test_unique_index_rejects_second_key() {
        let index = BTreeIndex::new("uniq", true);
        assert!(index.insert_entry(b"k", loc(1, 0)));
        assert!(!index.insert_entry(b"k", loc(1, 1)));

        // Removing the holder frees the key again.
        assert!(index.delete_entry(b"k", loc(1, 0)));
        assert!(index.insert_entry(b"k", loc(1, 1)));
    }

    #[test]
    fn test_scan_missing_key_is_empty() {
        let index = BTreeIndex::new("ix", false);
        assert!(index.scan_key(b"absent").is_empty());
        assert!(!index.delete_entry(b"absent", loc(1, 0)));
    }
}

#[cfg(test)]
mod logging_tests {
    use crate::logging::{BackendLogger, LogManager, LogRecord, MemoryLogger};
    use osprey_common::config::LoggingConfig;
    use osprey_common::types::{CommitId, TxnId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_disabled_logging_drops_records() {
        let manager = LogManager::new(LoggingConfig::default());
        let backend = Arc::new(MemoryLogger::new());
        manager.set_backend(backend.clone());

        assert!(!manager.is_in_logging_mode());
        manager.log(LogRecord::Begin { txn_id: TxnId(2) });
        assert_eq!(backend.record_count(), 0);
    }

    #[test]
    fn test_records_arrive_in_emission_order() {
        let manager = LogManager::new(LoggingConfig {
            enabled: true,
            sync_commit: false,
        });
        let backend = Arc::new(MemoryLogger::new());
        manager.set_backend(backend.clone());
        assert!(manager.is_in_logging_mode());

        manager.log(LogRecord::Begin { txn_id: TxnId(2) });
        manager.log(LogRecord::Commit {
            txn_id: TxnId(2),
            cid: CommitId(2),
        });
        manager.log(LogRecord::End { txn_id: TxnId(2) });

        let records = backend.records();
        assert_eq!(
            records,
            vec![
                LogRecord::Begin { txn_id: TxnId(2) },
                LogRecord::Commit {
                    txn_id: TxnId(2),
                    cid: CommitId(2)
                },
                LogRecord::End { txn_id: TxnId(2) },
            ]
        );
        assert!(records.iter().all(|r| r.txn_id() == TxnId(2)));
    }

    #[test]
    fn test_no_backend_is_not_logging_mode() {
        let manager = LogManager::new(LoggingConfig {
            enabled: true,
            sync_commit: true,
        });
        assert!(!manager.is_in_logging_mode());
        assert!(manager.sync_commit());
        // Nothing to drain without a backend.
        manager.wait_for_flush();
    }

    /// Reports an in-flight flush for a fixed number of polls.
    struct DrainAfter {
        polls_left: AtomicUsize,
    }

    impl BackendLogger for DrainAfter {
        fn log(&self, _record: &LogRecord) {}

        fn is_waiting_for_flush(&self) -> bool {
            let left = self.polls_left.load(Ordering::Relaxed);
            if left == 0 {
                return false;
            }
            self.polls_left.fetch_sub(1, Ordering::Relaxed);
            true
        }
    }

    #[test]
    fn test_wait_for_flush_drains_backend() {
        let manager = LogManager::new(LoggingConfig {
            enabled: true,
            sync_commit: true,
        });
        let backend = Arc::new(DrainAfter {
            polls_left: AtomicUsize::new(25),
        });
        manager.set_backend(backend.clone());

        manager.wait_for_flush();
        assert!(!backend.is_waiting_for_flush());
    }

    /// Never finishes flushing.
    struct StuckBackend;

    impl BackendLogger for StuckBackend {
        fn log(&self, _record: &LogRecord) {}

        fn is_waiting_for_flush(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_wait_for_flush_gives_up_on_stuck_backend() {
        let manager = LogManager::new(LoggingConfig {
            enabled: true,
            sync_commit: true,
        });
        let backend = Arc::new(StuckBackend);
        manager.set_backend(backend.clone());

        // The bounded wait expires and the commit path moves on; the
        // backend is still reporting an in-flight flush when it does.
        manager.wait_for_flush();
        assert!(backend.is_waiting_for_flush());
    }
}

#[cfg(test)]
mod gc_tests {
    use crate::catalog::Catalog;
    use crate::gc::{sweep_table, GcStats};
    use crate::index::{BTreeIndex, Index};
    use crate::table::{identity_key, DataTable};
    use osprey_common::config::{GcConfig, StorageConfig};
    use osprey_common::types::{CommitId, ItemPointer, TxnId};
    use std::sync::Arc;

    fn setup() -> (Arc<Catalog>, DataTable) {
        let catalog = Arc::new(Catalog::new());
        let table = DataTable::new(
            catalog.next_table_id(),
            "t",
            StorageConfig {
                tuples_per_tile_group: 8,
            },
            Arc::clone(&catalog),
        );
        (catalog, table)
    }

    fn group_of(table: &DataTable, loc: ItemPointer) -> Arc<crate::tile_group::TileGroup> {
        table
            .tile_groups()
            .into_iter()
            .find(|group| group.id() == loc.tile_group)
            .unwrap()
    }

    /// Insert and commit one row at `cid`.
    fn committed_row(table: &DataTable, payload: &[u8], cid: u64) -> ItemPointer {
        let loc = table.insert_tuple(TxnId(7), payload.to_vec()).unwrap();
        group_of(table, loc).commit_inserted_tuple(loc.offset, TxnId(7), CommitId(cid));
        loc
    }

    /// Supersede `old` with `payload` in one committed update at `cid`.
    fn committed_update(
        table: &DataTable,
        old: ItemPointer,
        payload: &[u8],
        cid: u64,
    ) -> ItemPointer {
        let old_group = group_of(table, old);
        assert!(old_group
            .slot_header(old.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        let newer = table.acquire_empty_slot(TxnId(9), payload.to_vec());
        let new_group = group_of(table, newer);
        old_group.slot_header(old.offset).set_next(newer);
        new_group.slot_header(newer.offset).set_prev(old);
        old_group.commit_deleted_tuple(old.offset, TxnId(9), CommitId(cid));
        new_group.commit_inserted_tuple(newer.offset, TxnId(9), CommitId(cid));
        newer
    }

    #[test]
    fn test_sweep_reclaims_superseded_version_and_splices() {
        let (catalog, table) = setup();
        let index = Arc::new(BTreeIndex::new("by_payload", false));
        table.add_index(index.clone(), identity_key());

        let old = committed_row(&table, b"v1", 2);
        let newer = committed_update(&table, old, b"v2", 4);

        let stats = GcStats::new();
        let result = sweep_table(&catalog, &table, CommitId(5), &GcConfig::default(), &stats);

        assert_eq!(result.slots_reclaimed, 1);
        let old_snap = group_of(&table, old).slot_header(old.offset).snapshot();
        assert_eq!(old_snap.owner, TxnId::INVALID);
        assert_eq!(old_snap.begin_cid, CommitId::MAX);
        assert!(group_of(&table, old).get_tuple(old.offset).is_none());

        // Chain spliced and the index entry carried to the survivor,
        // re-keyed under the survivor's payload.
        let new_snap = group_of(&table, newer).slot_header(newer.offset).snapshot();
        assert!(new_snap.prev.is_null());
        assert!(index.scan_key(b"v1").is_empty());
        assert_eq!(index.scan_key(b"v2"), vec![newer]);
    }

    /// Complete a delete of `loc` at `cid`: close the version and seal an
    /// empty tail behind it, the shape the commit path leaves behind.
    fn committed_delete(table: &DataTable, loc: ItemPointer, cid: u64) {
        let group = group_of(table, loc);
        assert!(group
            .slot_header(loc.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        let tail = table.insert_empty_version();
        let tail_group = group_of(table, tail);
        tail_group.slot_header(tail.offset).set_prev(loc);
        group.slot_header(loc.offset).set_next(tail);
        group.commit_deleted_tuple(loc.offset, TxnId(9), CommitId(cid));
        tail_group.slot_header(tail.offset).set_begin_cid(CommitId(cid));
        tail_group.slot_header(tail.offset).set_end_cid(CommitId(cid));
    }

    #[test]
    fn test_sweep_retires_deleted_row_and_its_entries() {
        let (catalog, table) = setup();
        let index = Arc::new(BTreeIndex::new("by_payload", false));
        table.add_index(index.clone(), identity_key());

        let loc = committed_row(&table, b"gone", 2);
        committed_delete(&table, loc, 3);

        let stats = GcStats::new();
        let result = sweep_table(&catalog, &table, CommitId(4), &GcConfig::default(), &stats);

        // Both the closed version and its empty tail go; the entries are
        // retired rather than repointed at the tail.
        assert_eq!(result.slots_reclaimed, 2);
        assert!(index.scan_key(b"gone").is_empty());
        let snap = group_of(&table, loc).slot_header(loc.offset).snapshot();
        assert_eq!(snap.owner, TxnId::INVALID);
        assert_eq!(snap.begin_cid, CommitId::MAX);
        assert_eq!(stats.snapshot().total_reclaimed_slots, 2);
    }

    #[test]
    fn test_sweep_keeps_versions_visible_to_old_snapshots() {
        let (catalog, table) = setup();
        let old = committed_row(&table, b"v1", 2);
        committed_update(&table, old, b"v2", 4);

        // A transaction that began at cid 3 can still read the old version.
        let stats = GcStats::new();
        let result = sweep_table(&catalog, &table, CommitId(3), &GcConfig::default(), &stats);

        assert_eq!(result.slots_reclaimed, 0);
        let old_snap = group_of(&table, old).slot_header(old.offset).snapshot();
        assert_eq!(old_snap.begin_cid, CommitId(2));
    }

    #[test]
    fn test_batch_size_bounds_one_sweep() {
        let (catalog, table) = setup();
        let mut rows = Vec::new();
        for i in 0..3u8 {
            rows.push(committed_row(&table, &[i], 2));
        }
        for loc in &rows {
            let group = group_of(&table, *loc);
            assert!(group
                .slot_header(loc.offset)
                .try_set_owner(TxnId::INITIAL, TxnId(9)));
            group.commit_deleted_tuple(loc.offset, TxnId(9), CommitId(3));
        }

        let config = GcConfig {
            batch_size: 2,
            ..Default::default()
        };
        let stats = GcStats::new();
        let first = sweep_table(&catalog, &table, CommitId(10), &config, &stats);
        assert_eq!(first.slots_reclaimed, 2);

        let second = sweep_table(&catalog, &table, CommitId(10), &config, &stats);
        assert_eq!(second.slots_reclaimed, 1);
        assert_eq!(stats.snapshot().total_reclaimed_slots, 3);
        assert_eq!(stats.snapshot().total_sweeps, 2);
    }
}

#[cfg(test)]
mod gc_runner_tests {
    use crate::catalog::Catalog;
    use crate::gc::{GcRunner, SafepointProvider};
    use crate::table::DataTable;
    use osprey_common::config::{EngineConfig, GcConfig, StorageConfig};
    use osprey_common::types::{CommitId, TxnId};
    use std::sync::Arc;
    use std::time::Duration;

    /// Hands the runner a fixed safepoint; no transactions involved.
    struct FixedSafepoint(CommitId);

    impl SafepointProvider for FixedSafepoint {
        fn safepoint(&self) -> CommitId {
            self.0
        }
    }

    /// Table holding one committed row whose delete committed at cid 3.
    fn table_with_dead_row(catalog: &Arc<Catalog>) -> Arc<DataTable> {
        let table = Arc::new(DataTable::new(
            catalog.next_table_id(),
            "t",
            StorageConfig {
                tuples_per_tile_group: 8,
            },
            Arc::clone(catalog),
        ));
        let loc = table.insert_tuple(TxnId(7), b"old".to_vec()).unwrap();
        let group = table.tile_group_by_offset(0).unwrap();
        group.commit_inserted_tuple(loc.offset, TxnId(7), CommitId(2));
        assert!(group
            .slot_header(loc.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        group.commit_deleted_tuple(loc.offset, TxnId(9), CommitId(3));
        table
    }

    #[test]
    fn test_runner_sweeps_on_interval() {
        let catalog = Arc::new(Catalog::new());
        let table = table_with_dead_row(&catalog);
        let config = EngineConfig::default();

        let mut runner = GcRunner::start(
            Arc::clone(&catalog),
            vec![Arc::clone(&table)],
            Arc::new(FixedSafepoint(CommitId(10))),
            GcConfig {
                interval_ms: 10,
                ..config.gc
            },
        )
        .expect("spawn gc thread");
        assert!(runner.is_running());

        std::thread::sleep(Duration::from_millis(50));
        runner.stop();
        assert!(!runner.is_running());

        let stats = runner.stats_snapshot();
        assert!(stats.total_sweeps > 0);
        assert_eq!(stats.total_reclaimed_slots, 1);
        assert_eq!(stats.last_safepoint, CommitId(10));
    }

    #[test]
    fn test_disabled_runner_never_spawns() {
        let catalog = Arc::new(Catalog::new());
        let table = table_with_dead_row(&catalog);

        let mut runner = GcRunner::start(
            Arc::clone(&catalog),
            vec![Arc::clone(&table)],
            Arc::new(FixedSafepoint(CommitId(10))),
            GcConfig {
                enabled: false,
                interval_ms: 1,
                ..GcConfig::default()
            },
        )
        .expect("inert runner");
        assert!(!runner.is_running());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(runner.stats_snapshot().total_sweeps, 0);
        // The dead row is untouched until someone sweeps explicitly.
        let group = table.tile_group_by_offset(0).unwrap();
        assert_eq!(group.slot_header(0).owner(), TxnId::INITIAL);
        runner.stop();
        assert!(!runner.is_running());
    }
}

#[cfg(test)]
mod verification_tests {
    use crate::catalog::Catalog;
    use crate::table::DataTable;
    use crate::verification::{verify_table, ChainViolation};
    use osprey_common::config::StorageConfig;
    use osprey_common::types::{CommitId, ItemPointer, TileGroupId, TxnId};
    use std::sync::Arc;

    fn setup() -> (Arc<Catalog>, DataTable) {
        let catalog = Arc::new(Catalog::new());
        let table = DataTable::new(
            catalog.next_table_id(),
            "t",
            StorageConfig {
                tuples_per_tile_group: 8,
            },
            Arc::clone(&catalog),
        );
        (catalog, table)
    }

    /// Committed two-version chain: v1 at cid 2 superseded at cid 4.
    fn two_version_chain(table: &DataTable) -> (ItemPointer, ItemPointer) {
        let group = table.tile_group_by_offset(0).unwrap();
        let old = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(old.offset, TxnId(7), CommitId(2));

        assert!(group
            .slot_header(old.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        let newer = table.acquire_empty_slot(TxnId(9), b"v2".to_vec());
        group.slot_header(old.offset).set_next(newer);
        group.slot_header(newer.offset).set_prev(old);
        group.commit_deleted_tuple(old.offset, TxnId(9), CommitId(4));
        group.commit_inserted_tuple(newer.offset, TxnId(9), CommitId(4));
        (old, newer)
    }

    #[test]
    fn test_committed_chain_is_consistent() {
        let (catalog, table) = setup();
        two_version_chain(&table);

        let report = verify_table(&catalog, &table, &[]);
        assert!(report.is_consistent(), "{}", report.summary());
        assert_eq!(report.chains_checked, 1);
        assert_eq!(report.versions_checked, 2);
    }

    #[test]
    fn test_seam_mismatch_is_detected() {
        let (catalog, table) = setup();
        let (_old, newer) = two_version_chain(&table);
        let group = table.tile_group_by_offset(0).unwrap();
        group.slot_header(newer.offset).set_begin_cid(CommitId(6));

        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::SeamMismatch { .. })));
    }

    #[test]
    fn test_broken_back_link_is_detected() {
        let (catalog, table) = setup();
        let (_old, newer) = two_version_chain(&table);
        let group = table.tile_group_by_offset(0).unwrap();
        group
            .slot_header(newer.offset)
            .set_prev(ItemPointer::INVALID);

        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::BrokenBackLink { .. })));
    }

    #[test]
    fn test_off_tail_invalid_owner_is_detected() {
        let (catalog, table) = setup();
        let (old, _newer) = two_version_chain(&table);
        let group = table.tile_group_by_offset(0).unwrap();
        group.slot_header(old.offset).set_owner(TxnId::INVALID);

        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::MisplacedInvalidOwner { .. })));
    }

    #[test]
    fn test_live_owner_outside_live_set_is_flagged() {
        let (catalog, table) = setup();
        let loc = table.acquire_empty_slot(TxnId(42), b"row".to_vec());
        assert!(!loc.is_null());

        let clean = verify_table(&catalog, &table, &[TxnId(42)]);
        assert!(clean.is_consistent(), "{}", clean.summary());

        let stale = verify_table(&catalog, &table, &[]);
        assert!(stale
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::UnknownOwner { .. })));
    }

    #[test]
    fn test_aborted_update_husk_is_tolerated() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let old = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(old.offset, TxnId(7), CommitId(2));

        // Update starts, links the new version, then aborts.
        assert!(group
            .slot_header(old.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        let newer = table.acquire_empty_slot(TxnId(9), b"v2".to_vec());
        group.slot_header(old.offset).set_next(newer);
        group.slot_header(newer.offset).set_prev(old);
        group.abort_deleted_tuple(old.offset, TxnId(9));
        group.abort_inserted_tuple(newer.offset);

        let report = verify_table(&catalog, &table, &[]);
        assert!(report.is_consistent(), "{}", report.summary());
        assert_eq!(report.versions_checked, 2);
    }

    #[test]
    fn test_dangling_forward_link_is_detected() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let loc = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(loc.offset, TxnId(7), CommitId(2));

        // Forward link into a tile group nobody registered.
        group
            .slot_header(loc.offset)
            .set_next(ItemPointer::new(TileGroupId(9999), 0));
        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::DanglingLink { .. })));

        // Same verdict for a known group with an out-of-range slot.
        group
            .slot_header(loc.offset)
            .set_next(ItemPointer::new(group.id(), 999));
        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::DanglingLink { .. })));
    }

    #[test]
    fn test_chain_cycle_is_detected() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let head = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(head.offset, TxnId(7), CommitId(2));
        let mid = table.acquire_empty_slot(TxnId(7), b"v2".to_vec());
        group.commit_inserted_tuple(mid.offset, TxnId(7), CommitId(3));
        let tail = table.acquire_empty_slot(TxnId(7), b"v3".to_vec());
        group.commit_inserted_tuple(tail.offset, TxnId(7), CommitId(4));

        // Stitch the seams, then loop the tail back into the middle.
        group.slot_header(head.offset).set_end_cid(CommitId(3));
        group.slot_header(mid.offset).set_end_cid(CommitId(4));
        group.slot_header(head.offset).set_next(mid);
        group.slot_header(mid.offset).set_prev(head);
        group.slot_header(mid.offset).set_next(tail);
        group.slot_header(tail.offset).set_prev(mid);
        group.slot_header(tail.offset).set_next(mid);

        let report = verify_table(&catalog, &table, &[]);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ChainViolation::CycleDetected { .. })));
    }

    #[test]
    fn test_inverted_interval_is_detected() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let loc = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(loc.offset, TxnId(7), CommitId(5));
        group.slot_header(loc.offset).set_end_cid(CommitId(3));

        let report = verify_table(&catalog, &table, &[]);
        assert!(report.violations.iter().any(|v| matches!(
            v,
            ChainViolation::InvertedInterval {
                begin: CommitId(5),
                end: CommitId(3),
                ..
            }
        )));
    }

    #[test]
    fn test_duplicate_invalid_owners_are_detected() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let head = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(head.offset, TxnId(7), CommitId(2));

        // A committed delete seals one empty tail behind the version it
        // closes; a corrupted chain carries two.
        assert!(group
            .slot_header(head.offset)
            .try_set_owner(TxnId::INITIAL, TxnId(9)));
        let first = table.insert_empty_version();
        let second = table.insert_empty_version();
        group.slot_header(head.offset).set_next(first);
        group.slot_header(first.offset).set_prev(head);
        group.slot_header(first.offset).set_next(second);
        group.slot_header(second.offset).set_prev(first);
        group.commit_deleted_tuple(head.offset, TxnId(9), CommitId(3));
        for sealed in [first, second] {
            group.slot_header(sealed.offset).set_begin_cid(CommitId(3));
            group.slot_header(sealed.offset).set_end_cid(CommitId(3));
        }

        let report = verify_table(&catalog, &table, &[]);
        assert!(report.violations.iter().any(|v| matches!(
            v,
            ChainViolation::DuplicateInvalidOwner { count: 2, .. }
        )));
    }

    #[test]
    fn test_closed_tail_without_delete_is_detected() {
        let (catalog, table) = setup();
        let group = table.tile_group_by_offset(0).unwrap();
        let loc = table.acquire_empty_slot(TxnId(7), b"v1".to_vec());
        group.commit_inserted_tuple(loc.offset, TxnId(7), CommitId(2));

        // Interval closed with no successor and no sealed tail behind it.
        group.slot_header(loc.offset).set_end_cid(CommitId(4));

        let report = verify_table(&catalog, &table, &[]);
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(
            report.violations[0],
            ChainViolation::ClosedLiveTail {
                end: CommitId(4),
                ..
            }
        ));
    }
}
