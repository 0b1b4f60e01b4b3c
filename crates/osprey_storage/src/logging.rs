//! Transaction lifecycle logging.
//!
//! The manager emits one record per lifecycle transition. Logging is
//! best-effort by contract: a missing or failing backend never aborts a
//! transaction. With synchronous commit configured, the commit path waits
//! (bounded) for the backend to drain before the commit id is published.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

use osprey_common::config::LoggingConfig;
use osprey_common::types::{CommitId, TxnId};

/// A single transaction lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Transaction started.
    Begin { txn_id: TxnId },
    /// Transaction committed at `cid`.
    Commit { txn_id: TxnId, cid: CommitId },
    /// Transaction rolled back.
    Abort { txn_id: TxnId },
    /// Transaction deregistered; nothing more will be emitted for it.
    End { txn_id: TxnId },
}

impl LogRecord {
    pub fn txn_id(&self) -> TxnId {
        match self {
            LogRecord::Begin { txn_id }
            | LogRecord::Commit { txn_id, .. }
            | LogRecord::Abort { txn_id }
            | LogRecord::End { txn_id } => *txn_id,
        }
    }
}

/// Sink for lifecycle records. Implementations decide durability; `log`
/// must not block the caller beyond buffering.
pub trait BackendLogger: Send + Sync {
    fn log(&self, record: &LogRecord);

    /// True while buffered records have not yet reached durable storage.
    fn is_waiting_for_flush(&self) -> bool;
}

/// Iterations of the bounded drain wait before synchronous commit gives up
/// and proceeds. Giving up trades durability for liveness; the commit
/// itself is never blocked indefinitely on the logger.
const FLUSH_WAIT_ROUNDS: usize = 10_000;

pub struct LogManager {
    config: LoggingConfig,
    backend: RwLock<Option<Arc<dyn BackendLogger>>>,
}

impl LogManager {
    pub fn new(config: LoggingConfig) -> Self {
        LogManager {
            config,
            backend: RwLock::new(None),
        }
    }

    pub fn set_backend(&self, backend: Arc<dyn BackendLogger>) {
        *self.backend.write() = Some(backend);
    }

    /// Records are produced only when logging is configured on and a
    /// backend is attached.
    pub fn is_in_logging_mode(&self) -> bool {
        self.config.enabled && self.backend.read().is_some()
    }

    pub fn sync_commit(&self) -> bool {
        self.config.sync_commit
    }

    pub fn log(&self, record: LogRecord) {
        if !self.config.enabled {
            return;
        }
        if let Some(backend) = self.backend.read().as_ref() {
            backend.log(&record);
        }
    }

    /// Waits for the backend to drain, bounded. Used by synchronous
    /// commit after the COMMIT record is emitted.
    pub fn wait_for_flush(&self) {
        let backend = match self.backend.read().as_ref() {
            Some(backend) => Arc::clone(backend),
            None => return,
        };
        for _ in 0..FLUSH_WAIT_ROUNDS {
            if !backend.is_waiting_for_flush() {
                return;
            }
            std::thread::yield_now();
        }
        warn!("log backend still draining after bounded wait; continuing");
    }
}

/// Backend that keeps every record in memory. Records are durable the
/// moment they are appended.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

impl BackendLogger for MemoryLogger {
    fn log(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }

    fn is_waiting_for_flush(&self) -> bool {
        false
    }
}
