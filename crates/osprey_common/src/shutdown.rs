//! Interruptible stop signal for background threads.
//!
//! A sweep loop that sleeps between rounds should not make its owner wait
//! out the full interval at shutdown. The signal wraps a `Condvar` so a
//! blocked `wait_timeout` wakes within milliseconds of `shutdown()` being
//! called.
//!
//! ```ignore
//! let signal = ShutdownSignal::new();
//! let worker = signal.clone();
//!
//! // Worker loop:
//! while !worker.wait_timeout(interval) {
//!     // one round of work
//! }
//!
//! // Owner, at teardown:
//! signal.shutdown();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cooperative stop flag shared between an owner and its worker threads.
///
/// Clones share one underlying flag; `shutdown()` through any handle wakes
/// every waiter.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    requested: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal {
            inner: Arc::new(SignalInner {
                requested: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Requests shutdown and wakes every blocked waiter. Idempotent.
    pub fn shutdown(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Blocks for at most `duration`, returning early if `shutdown()` is
    /// called. Returns `true` when shutdown has been requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut guard = self.inner.mutex.lock();
        self.inner.condvar.wait_for(&mut guard, duration);
        self.is_shutdown()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
