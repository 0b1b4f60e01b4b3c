use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier. Monotonically increasing, process-lifetime scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// No owner. A slot with this owner holds no live or pending version.
    pub const INVALID: TxnId = TxnId(0);
    /// Bootstrap owner: the tuple is committed and owned by nobody.
    pub const INITIAL: TxnId = TxnId(1);
    /// Exhaustion sentinel. Allocating this id is a fatal error.
    pub const MAX: TxnId = TxnId(u64::MAX);

    /// True for the two reserved non-live values.
    pub fn is_reserved(self) -> bool {
        self == TxnId::INVALID || self == TxnId::INITIAL
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Commit identifier: the total-order timestamp assigned at commit time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct CommitId(pub u64);

impl CommitId {
    pub const INVALID: CommitId = CommitId(0);
    /// First commit id handed out after bootstrap.
    pub const START: CommitId = CommitId(1);
    /// Sentinel: still open, not yet committed to an end time.
    pub const MAX: CommitId = CommitId(u64::MAX);

    pub fn next(self) -> CommitId {
        CommitId(self.0 + 1)
    }

    pub fn prev(self) -> CommitId {
        CommitId(self.0 - 1)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{}", self.0)
    }
}

/// Unique identifier for a tile group within the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileGroupId(pub u32);

impl TileGroupId {
    pub const INVALID: TileGroupId = TileGroupId(u32::MAX);
}

impl fmt::Display for TileGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tg:{}", self.0)
    }
}

/// Unique identifier for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl TableId {
    pub const INVALID: TableId = TableId(u32::MAX);
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tbl:{}", self.0)
    }
}

/// Invalid tuple-slot offset, also the "tile group full" signal.
pub const INVALID_SLOT: u32 = u32::MAX;

/// Stable logical row address: (tile group, slot offset within it).
///
/// Packs into a single u64 so a version-chain link fits one atomic word;
/// the null pointer packs to `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemPointer {
    pub tile_group: TileGroupId,
    pub offset: u32,
}

impl ItemPointer {
    pub const INVALID: ItemPointer = ItemPointer {
        tile_group: TileGroupId::INVALID,
        offset: INVALID_SLOT,
    };

    pub fn new(tile_group: TileGroupId, offset: u32) -> Self {
        Self { tile_group, offset }
    }

    /// Null iff both halves carry the invalid sentinel.
    pub fn is_null(self) -> bool {
        self.tile_group == TileGroupId::INVALID && self.offset == INVALID_SLOT
    }

    /// Pack into one word: tile group in the high half, offset in the low.
    pub fn to_raw(self) -> u64 {
        ((self.tile_group.0 as u64) << 32) | self.offset as u64
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            tile_group: TileGroupId((raw >> 32) as u32),
            offset: raw as u32,
        }
    }
}

impl Default for ItemPointer {
    fn default() -> Self {
        ItemPointer::INVALID
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "(null)")
        } else {
            write!(f, "({}, {})", self.tile_group.0, self.offset)
        }
    }
}
