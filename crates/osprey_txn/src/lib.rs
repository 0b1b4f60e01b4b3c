pub mod context;
pub mod manager;


pub use context::{GroupSlots, TransactionContext};
pub use manager::{TransactionManager, TxnStatsSnapshot};

// Re-export from osprey_common for convenience
pub use osprey_common::types::{CommitId, ItemPointer, TxnId};
