use thiserror::Error;

use crate::types::{TileGroupId, TxnId};

/// Convenience alias for `Result<T, OspreyError>`.
pub type OspreyResult<T> = Result<T, OspreyError>;

/// Error classification for abort/restart decisions.
///
/// - `UserError`  — constraint violation; resolved by aborting the transaction
/// - `Retryable`  — transient condition (lost write race); the transaction
///                  can be retried from the top
/// - `Fatal`      — id space exhaustion or a programmer-error-class misuse;
///                  not recoverable inside the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Fatal,
}

/// Top-level error type that crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum OspreyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage layer errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Tile group not found: {0}")]
    TileGroupNotFound(TileGroupId),

    #[error("Tuple slot {slot} out of bounds for tile group of capacity {capacity}")]
    SlotOutOfBounds { slot: u32, capacity: u32 },

    #[error("Unique constraint violation on index {index}: conflicting key {key_hex}")]
    UniqueViolation { index: String, key_hex: String },
}

/// Transaction layer errors.
#[derive(Error, Debug)]
pub enum TxnError {
    #[error("Transaction id space exhausted")]
    TxnIdSpaceExhausted,

    #[error("Transaction {0} not found in the live-transaction table")]
    NotFound(TxnId),

    #[error("Transaction {0} conflict: tuple owned by a concurrent writer")]
    WriteConflict(TxnId),
}

impl OspreyError {
    /// Classify this error for abort/restart decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OspreyError::Storage(StorageError::UniqueViolation { .. }) => ErrorKind::UserError,
            OspreyError::Txn(TxnError::WriteConflict(_)) => ErrorKind::Retryable,
            OspreyError::Txn(TxnError::TxnIdSpaceExhausted) => ErrorKind::Fatal,
            OspreyError::Txn(TxnError::NotFound(_)) => ErrorKind::Fatal,
            OspreyError::Storage(StorageError::TileGroupNotFound(_)) => ErrorKind::Fatal,
            OspreyError::Storage(StorageError::SlotOutOfBounds { .. }) => ErrorKind::Fatal,
            OspreyError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// True if the transaction can be retried after aborting.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// True for conditions the process cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}

/// Hex-encode an index key for diagnostic output.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
