//! MVCC slot reclamation.
//!
//! Design principles:
//! - **No stop-the-world**: sweeps run concurrently with reads and writes,
//!   touching only versions no snapshot can reach.
//! - **Safepoint-driven**: a version is reclaimable iff its validity
//!   interval closed strictly before the oldest begin-commit-id still held
//!   by an active transaction.
//! - **Chain-preserving**: reclaiming a mid-chain version splices its
//!   neighbors together so probes can still walk from an index entry to the
//!   live version.
//! - **Index-owning**: index entries exist only for a chain's head slot, so
//!   reclaiming a head either retires its entries (row gone) or repoints
//!   them at the surviving successor.
//! - **Pull-driven**: the background runner polls its safepoint provider on
//!   a fixed interval; nothing in the write path blocks on reclamation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use osprey_common::config::GcConfig;
use osprey_common::shutdown::ShutdownSignal;
use osprey_common::types::{CommitId, ItemPointer, TxnId};

use crate::catalog::Catalog;
use crate::header::HeaderSnapshot;
use crate::table::DataTable;
use crate::tile_group::TileGroup;

/// True when no active or future transaction can ever see the version.
///
/// Open-ended versions (`end == MAX`) and versions still held by a live
/// writer are never reclaimable; neither is an aborted-insert placeholder,
/// which keeps its slot until the whole group is retired.
pub fn is_reclaimable(header: &HeaderSnapshot, safepoint: CommitId) -> bool {
    let quiescent = header.owner == TxnId::INVALID || header.owner == TxnId::INITIAL;
    quiescent && header.end_cid < CommitId::MAX && header.end_cid < safepoint
}

/// Result of one sweep over a table.
#[derive(Debug, Clone, Default)]
pub struct GcSweepResult {
    /// Allocated slots examined.
    pub slots_inspected: u64,
    /// Slots returned to the free placeholder state.
    pub slots_reclaimed: u64,
    /// Payload bytes released.
    pub reclaimed_bytes: u64,
    /// Tile groups visited.
    pub groups_swept: u64,
    /// Slots left for a later sweep because of the batch limit.
    pub slots_skipped: u64,
    /// The safepoint this sweep ran against.
    pub safepoint: CommitId,
    /// Wall-clock duration of the sweep (microseconds).
    pub sweep_duration_us: u64,
}

/// Cumulative reclamation statistics (atomic, lock-free).
#[derive(Debug, Default)]
pub struct GcStats {
    pub total_sweeps: AtomicU64,
    pub total_reclaimed_slots: AtomicU64,
    pub total_reclaimed_bytes: AtomicU64,
    pub total_slots_inspected: AtomicU64,
    pub last_safepoint: AtomicU64,
    pub last_sweep_duration_us: AtomicU64,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sweep(&self, result: &GcSweepResult) {
        self.total_sweeps.fetch_add(1, Ordering::Relaxed);
        self.total_reclaimed_slots
            .fetch_add(result.slots_reclaimed, Ordering::Relaxed);
        self.total_reclaimed_bytes
            .fetch_add(result.reclaimed_bytes, Ordering::Relaxed);
        self.total_slots_inspected
            .fetch_add(result.slots_inspected, Ordering::Relaxed);
        self.last_safepoint
            .store(result.safepoint.0, Ordering::Relaxed);
        self.last_sweep_duration_us
            .store(result.sweep_duration_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GcStatsSnapshot {
        GcStatsSnapshot {
            total_sweeps: self.total_sweeps.load(Ordering::Relaxed),
            total_reclaimed_slots: self.total_reclaimed_slots.load(Ordering::Relaxed),
            total_reclaimed_bytes: self.total_reclaimed_bytes.load(Ordering::Relaxed),
            total_slots_inspected: self.total_slots_inspected.load(Ordering::Relaxed),
            last_safepoint: CommitId(self.last_safepoint.load(Ordering::Relaxed)),
            last_sweep_duration_us: self.last_sweep_duration_us.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`GcStats`] for reporting.
#[derive(Debug, Clone, Default)]
pub struct GcStatsSnapshot {
    pub total_sweeps: u64,
    pub total_reclaimed_slots: u64,
    pub total_reclaimed_bytes: u64,
    pub total_slots_inspected: u64,
    pub last_safepoint: CommitId,
    pub last_sweep_duration_us: u64,
}

/// Run a single reclamation sweep over one table.
///
/// Walks every allocated slot in every tile group, reclaims the dead ones,
/// and keeps version chains and index entries consistent while doing so.
/// Respects `config.batch_size` (0 = unlimited).
pub fn sweep_table(
    catalog: &Catalog,
    table: &DataTable,
    safepoint: CommitId,
    config: &GcConfig,
    stats: &GcStats,
) -> GcSweepResult {
    let start = Instant::now();
    let mut result = GcSweepResult {
        safepoint,
        ..Default::default()
    };

    'groups: for group in table.tile_groups() {
        result.groups_swept += 1;
        let allocated = group.header().allocated_slots();
        for slot in 0..allocated {
            if config.batch_size > 0 && result.slots_reclaimed >= config.batch_size as u64 {
                result.slots_skipped += (allocated - slot) as u64;
                break 'groups;
            }
            result.slots_inspected += 1;

            let snap = group.slot_header(slot).snapshot();
            if !is_reclaimable(&snap, safepoint) {
                continue;
            }
            let location = ItemPointer::new(group.id(), slot);

            // Splice neighbors around the reclaimed version so walks from
            // an index entry still reach the live end of the chain.
            if let Some(prev_group) = resolve(catalog, snap.prev) {
                prev_group.slot_header(snap.prev.offset).set_next(snap.next);
            }
            if let Some(next_group) = resolve(catalog, snap.next) {
                next_group.slot_header(snap.next.offset).set_prev(snap.prev);
            }

            if snap.prev.is_null() {
                // Chain head: index entries point here. A successor owned
                // by nobody is a delete's empty tail, so the row is gone
                // and the entries retire with the head.
                if let Some(tuple) = group.get_tuple(slot) {
                    let successor = resolve(catalog, snap.next).and_then(|next_group| {
                        if next_group.slot_header(snap.next.offset).owner() == TxnId::INVALID {
                            None
                        } else {
                            next_group.get_tuple(snap.next.offset)
                        }
                    });
                    match successor {
                        Some(next_tuple) => {
                            table.repoint_index_entries(&tuple, &next_tuple, location, snap.next);
                        }
                        None => table.remove_index_entries(&tuple, location),
                    }
                }
            }

            if let Some(tuple) = group.get_tuple(slot) {
                result.reclaimed_bytes += tuple.len() as u64;
            }
            group.reclaim_tuple(slot);
            result.slots_reclaimed += 1;
        }
    }

    result.sweep_duration_us = start.elapsed().as_micros() as u64;
    stats.record_sweep(&result);
    if result.slots_reclaimed > 0 {
        tracing::debug!(
            table = %table.id(),
            safepoint = %safepoint,
            reclaimed = result.slots_reclaimed,
            bytes = result.reclaimed_bytes,
            "gc sweep"
        );
    }
    result
}

fn resolve(catalog: &Catalog, loc: ItemPointer) -> Option<Arc<TileGroup>> {
    if loc.is_null() {
        return None;
    }
    catalog.try_tile_group(loc.tile_group)
}

/// Source of the reclamation safepoint.
///
/// The transaction manager implements this (a test stub works too); the
/// trait keeps the runner from depending on the transaction crate.
pub trait SafepointProvider: Send + Sync {
    /// Oldest commit id any live transaction can still read at.
    fn safepoint(&self) -> CommitId;
}

/// Background reclamation driver.
///
/// Owns one named thread that polls the safepoint and sweeps the given
/// tables every `interval_ms`. Stopping the runner (or dropping it)
/// signals the thread and joins it. With `gc.enabled = false` the runner
/// starts inert and reclamation is left to explicit [`sweep_table`] calls.
pub struct GcRunner {
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
    stats: Arc<GcStats>,
}

impl GcRunner {
    pub fn start(
        catalog: Arc<Catalog>,
        tables: Vec<Arc<DataTable>>,
        provider: Arc<dyn SafepointProvider>,
        config: GcConfig,
    ) -> std::io::Result<Self> {
        let signal = ShutdownSignal::new();
        let stats = Arc::new(GcStats::new());
        if !config.enabled {
            tracing::info!("slot reclamation runner disabled (gc.enabled=false)");
            return Ok(GcRunner {
                signal,
                handle: None,
                stats,
            });
        }

        let worker_signal = signal.clone();
        let worker_stats = Arc::clone(&stats);
        let interval = Duration::from_millis(config.interval_ms.max(1));
        let table_count = tables.len();
        let handle = std::thread::Builder::new()
            .name("osprey-gc".to_string())
            .spawn(move || {
                while !worker_signal.wait_timeout(interval) {
                    let safepoint = provider.safepoint();
                    if safepoint == CommitId::INVALID {
                        continue;
                    }
                    for table in &tables {
                        sweep_table(&catalog, table, safepoint, &config, &worker_stats);
                    }
                }
            })?;
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            tables = table_count,
            "slot reclamation runner started"
        );
        Ok(GcRunner {
            signal,
            handle: Some(handle),
            stats,
        })
    }

    /// True while the sweep thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cumulative statistics over every sweep the runner has made.
    pub fn stats_snapshot(&self) -> GcStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signals the thread and joins it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.signal.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GcRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
