//! Wait strategies for ring buffer backpressure.
//!
//! A ring buffer blocks its reader when empty and its writer when full.
//! How that block happens is pluggable:
//!
//! - [`BlockingWait`]: parks the thread on a condition variable. Lowest CPU,
//!   higher wake latency.
//! - [`SpinWait`]: busy-waits on an atomic flag, yielding the time slice
//!   after a bounded number of spins. Lowest latency, burns a core.
//!
//! Both behave like an auto-reset event: a `signal()` issued while nobody is
//! waiting is remembered and consumed by the next `wait()`, so a wakeup is
//! never lost. Callers always re-check their condition after `wait()` returns.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Blocking primitive used by ring buffers.
pub trait WaitStrategy: Send + Sync {
    /// Block until `signal()` has been called at least once since the last
    /// consumed signal.
    fn wait(&self);

    /// Like `wait`, bounded by `timeout`.
    ///
    /// Returns `true` if a signal was consumed, `false` on timeout.
    fn wait_timeout(&self, timeout: Duration) -> bool;

    /// Wake the waiter (or arm the next wait). Cheap when nobody waits.
    fn signal(&self);
}

/// Wait strategy selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategyKind {
    /// Condition-variable parking
    #[default]
    Blocking,
    /// Busy-wait with yield
    Spin,
}

impl WaitStrategyKind {
    /// Build a fresh wait handle of this kind.
    #[must_use]
    pub fn build(self) -> Box<dyn WaitStrategy> {
        match self {
            Self::Blocking => Box::new(BlockingWait::new()),
            Self::Spin => Box::new(SpinWait::new()),
        }
    }
}

/// Condvar-based auto-reset event.
#[derive(Debug, Default)]
pub struct BlockingWait {
    /// `true` while a signal is pending
    pending: Mutex<bool>,
    condvar: Condvar,
    /// Hint so `signal()` can skip the lock when nobody is parked
    has_waiter: AtomicBool,
}

impl BlockingWait {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWait {
    fn wait(&self) {
        let mut pending = self.pending.lock();
        self.has_waiter.store(true, Ordering::SeqCst);
        while !*pending {
            self.condvar.wait(&mut pending);
        }
        *pending = false;
        self.has_waiter.store(false, Ordering::SeqCst);
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        self.has_waiter.store(true, Ordering::SeqCst);
        while !*pending {
            if self.condvar.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        let signalled = *pending;
        *pending = false;
        self.has_waiter.store(false, Ordering::SeqCst);
        signalled
    }

    fn signal(&self) {
        let mut pending = self.pending.lock();
        if *pending {
            return;
        }
        *pending = true;
        if self.has_waiter.load(Ordering::SeqCst) {
            self.condvar.notify_one();
        }
    }
}

/// Spins this many times before yielding the time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Busy-wait auto-reset event.
#[derive(Debug, Default)]
pub struct SpinWait {
    pending: AtomicBool,
}

impl SpinWait {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn try_consume(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn backoff(spins: &mut u32) {
        if *spins < SPINS_BEFORE_YIELD {
            *spins += 1;
            std::hint::spin_loop();
        } else {
            *spins = 0;
            std::thread::yield_now();
        }
    }
}

impl WaitStrategy for SpinWait {
    fn wait(&self) {
        let mut spins = 0;
        while !self.try_consume() {
            Self::backoff(&mut spins);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut spins = 0;
        loop {
            if self.try_consume() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            Self::backoff(&mut spins);
        }
    }

    #[inline]
    fn signal(&self) {
        self.pending.store(true, Ordering::Release);
    }
}
