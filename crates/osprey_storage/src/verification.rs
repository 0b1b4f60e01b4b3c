//! Structural self-check for version chains.
//!
//! Walks every chain in a table from its oldest version and validates the
//! properties the MVCC protocol is supposed to maintain at quiescent
//! points:
//! - owners are reserved ids or belong to the provided live-transaction set
//! - validity intervals are ordered (`begin <= end`)
//! - forward and backward links agree
//! - adjacent committed versions stitch exactly (`end` of one equals
//!   `begin` of the next)
//! - at most one invalid-owner version per chain, and only at the tail
//!
//! Running the check concurrently with active writers can surface
//! transient seam mismatches; callers quiesce first for an authoritative
//! answer.

use std::fmt;

use osprey_common::types::{CommitId, ItemPointer, TxnId};

use crate::catalog::Catalog;
use crate::header::HeaderSnapshot;
use crate::table::DataTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// Owner is neither a reserved id nor a known live transaction.
    UnknownOwner { location: ItemPointer, owner: TxnId },
    /// `begin > end` on a slot with a non-invalid owner.
    InvertedInterval {
        location: ItemPointer,
        begin: CommitId,
        end: CommitId,
    },
    /// A version's successor does not point back at it.
    BrokenBackLink {
        location: ItemPointer,
        successor: ItemPointer,
    },
    /// Adjacent committed versions whose intervals do not stitch.
    SeamMismatch {
        location: ItemPointer,
        end: CommitId,
        successor_begin: CommitId,
    },
    /// A link names a tile group or slot that does not exist.
    DanglingLink {
        location: ItemPointer,
        target: ItemPointer,
    },
    /// An invalid-owner version that is not the chain tail.
    MisplacedInvalidOwner { location: ItemPointer },
    /// More than one invalid-owner version in a single chain.
    DuplicateInvalidOwner { head: ItemPointer, count: usize },
    /// A chain tail closed its interval without being a completed delete.
    ClosedLiveTail { location: ItemPointer, end: CommitId },
    /// A chain longer than the table's slot population; the links loop.
    CycleDetected { head: ItemPointer },
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainViolation::UnknownOwner { location, owner } => {
                write!(f, "unknown owner {owner} at {location}")
            }
            ChainViolation::InvertedInterval {
                location,
                begin,
                end,
            } => write!(f, "inverted interval [{begin}, {end}) at {location}"),
            ChainViolation::BrokenBackLink {
                location,
                successor,
            } => write!(f, "successor {successor} does not link back to {location}"),
            ChainViolation::SeamMismatch {
                location,
                end,
                successor_begin,
            } => write!(
                f,
                "seam mismatch at {location}: end {end} vs successor begin {successor_begin}"
            ),
            ChainViolation::DanglingLink { location, target } => {
                write!(f, "dangling link {target} from {location}")
            }
            ChainViolation::MisplacedInvalidOwner { location } => {
                write!(f, "invalid owner off-tail at {location}")
            }
            ChainViolation::DuplicateInvalidOwner { head, count } => {
                write!(f, "{count} invalid owners in chain headed at {head}")
            }
            ChainViolation::ClosedLiveTail { location, end } => {
                write!(f, "tail at {location} closed at {end} without a delete")
            }
            ChainViolation::CycleDetected { head } => {
                write!(f, "version chain cycle headed at {head}")
            }
        }
    }
}

/// Outcome of one verification pass over a table.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub chains_checked: u64,
    pub versions_checked: u64,
    pub violations: Vec<ChainViolation>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "chains={} versions={} violations={}",
            self.chains_checked,
            self.versions_checked,
            self.violations.len()
        )
    }
}

/// Checks every version chain in `table`.
///
/// `live_txns` is the set of transaction ids currently executing; pass an
/// empty slice when the system is quiesced and every owner must already be
/// a reserved id.
pub fn verify_table(catalog: &Catalog, table: &DataTable, live_txns: &[TxnId]) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();
    let groups = table.tile_groups();

    let slot_population: u64 = groups
        .iter()
        .map(|group| group.header().allocated_slots() as u64)
        .sum();

    for group in &groups {
        let allocated = group.header().allocated_slots();
        for slot in 0..allocated {
            let snap = group.slot_header(slot).snapshot();
            if !snap.prev.is_null() {
                continue;
            }
            if is_free_placeholder(&snap) {
                continue;
            }
            let head = ItemPointer::new(group.id(), slot);
            report.chains_checked += 1;
            walk_chain(catalog, head, snap, live_txns, slot_population, &mut report);
        }
    }

    report
}

fn walk_chain(
    catalog: &Catalog,
    head: ItemPointer,
    head_snap: HeaderSnapshot,
    live_txns: &[TxnId],
    slot_population: u64,
    report: &mut ConsistencyReport,
) {
    let mut location = head;
    let mut snap = head_snap;
    let mut invalid_owners: Vec<ItemPointer> = Vec::new();
    let mut steps = 0u64;

    loop {
        steps += 1;
        if steps > slot_population {
            report.violations.push(ChainViolation::CycleDetected { head });
            return;
        }
        report.versions_checked += 1;

        check_version(location, &snap, live_txns, report);
        if snap.owner == TxnId::INVALID {
            invalid_owners.push(location);
        }

        if snap.next.is_null() {
            // Tail. An open interval or an invalid owner (completed delete,
            // aborted insert) is fine here; anything else means a version
            // got closed without a successor or a delete.
            if snap.end_cid != CommitId::MAX && snap.owner != TxnId::INVALID {
                report.violations.push(ChainViolation::ClosedLiveTail {
                    location,
                    end: snap.end_cid,
                });
            }
            break;
        }

        let Some(next_group) = catalog.try_tile_group(snap.next.tile_group) else {
            report.violations.push(ChainViolation::DanglingLink {
                location,
                target: snap.next,
            });
            return;
        };
        let Some(next_header) = next_group.header().get(snap.next.offset) else {
            report.violations.push(ChainViolation::DanglingLink {
                location,
                target: snap.next,
            });
            return;
        };
        let next_snap = next_header.snapshot();

        if next_snap.prev != location {
            report.violations.push(ChainViolation::BrokenBackLink {
                location,
                successor: snap.next,
            });
        }
        // The seam check skips an aborted-insert placeholder hanging off
        // the tail; its interval never opened.
        if !is_free_placeholder(&next_snap) && snap.end_cid != next_snap.begin_cid {
            report.violations.push(ChainViolation::SeamMismatch {
                location,
                end: snap.end_cid,
                successor_begin: next_snap.begin_cid,
            });
        }

        location = snap.next;
        snap = next_snap;
    }

    if invalid_owners.len() > 1 {
        report.violations.push(ChainViolation::DuplicateInvalidOwner {
            head,
            count: invalid_owners.len(),
        });
    }
    if let Some(first) = invalid_owners.first() {
        if *first != location {
            report
                .violations
                .push(ChainViolation::MisplacedInvalidOwner { location: *first });
        }
    }
}

fn check_version(
    location: ItemPointer,
    snap: &HeaderSnapshot,
    live_txns: &[TxnId],
    report: &mut ConsistencyReport,
) {
    let reserved = snap.owner == TxnId::INVALID || snap.owner == TxnId::INITIAL;
    if !reserved && !live_txns.contains(&snap.owner) {
        report.violations.push(ChainViolation::UnknownOwner {
            location,
            owner: snap.owner,
        });
    }
    if snap.owner != TxnId::INVALID && snap.begin_cid > snap.end_cid {
        report.violations.push(ChainViolation::InvertedInterval {
            location,
            begin: snap.begin_cid,
            end: snap.end_cid,
        });
    }
}

/// A slot that has never opened a visibility window: free, or an insert
/// that aborted before committing.
fn is_free_placeholder(snap: &HeaderSnapshot) -> bool {
    snap.owner == TxnId::INVALID
        && snap.begin_cid == CommitId::MAX
        && snap.end_cid == CommitId::MAX
}
