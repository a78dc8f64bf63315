//! Shared shutdown flag for the connection's loop threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable cancellation flag.
///
/// Every loop thread of a connection holds a clone and checks it at each
/// blocking-wait boundary. Raising the flag does not interrupt a thread
/// that is blocked inside a socket call; the socket itself must be shut
/// down for that.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` for the call that raised it first.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
