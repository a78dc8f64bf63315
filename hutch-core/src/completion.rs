//! Poolable, single-continuation completion handle.
//!
//! A `CompletionHandle<T>` stands in for a future wherever a caller must be
//! resumed when a command, publish or RPC finishes:
//!
//! - exactly one of `try_set_completed` / `try_set_result` /
//!   `try_set_exception` wins; losers return `false` and change nothing
//! - at most one continuation; registering after resolution runs it at once
//! - the continuation runs inline on the resolving thread, or on the shared
//!   continuation worker when `run_continuation_async` is set
//! - after the continuation returns, the recycler (if any) takes the handle
//!   back so a pool can reset and reuse it
//!
//! ```text
//! Pending ──CAS──▶ Resolving ──▶ Completed | Faulted ──▶ (recycled) Pending
//! ```

use crate::dispatch;
use crate::error::{HutchError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const RESOLVING: u8 = 1;
const COMPLETED: u8 = 2;
const FAULTED: u8 = 3;

/// Observable state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Completed,
    Faulted,
}

/// Code resumed when the handle resolves.
pub type Continuation<T> = Box<dyn FnOnce(&CompletionHandle<T>) + Send + 'static>;

/// Receives the handle after its continuation has run.
pub type Recycler<T> = Arc<dyn Fn(CompletionHandle<T>) + Send + Sync + 'static>;

struct Slot<T> {
    continuation: Option<Continuation<T>>,
    value: Option<T>,
    error: Option<HutchError>,
}

struct Inner<T> {
    state: AtomicU8,
    run_async: AtomicBool,
    recycled: AtomicBool,
    release_requested: AtomicBool,
    token: AtomicU64,
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
    recycler: Option<Recycler<T>>,
}

/// Zero-allocation future-like handle. Cloning shares the same handle.
pub struct CompletionHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> CompletionHandle<T> {
    /// Identity token. Changes every time the handle is recycled, so a stale
    /// correlation can be told apart from the current use.
    #[inline]
    #[must_use]
    pub fn token(&self) -> u64 {
        self.inner.token.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> CompletionState {
        match self.inner.state.load(Ordering::Acquire) {
            COMPLETED => CompletionState::Completed,
            FAULTED => CompletionState::Faulted,
            _ => CompletionState::Pending,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.state.load(Ordering::Acquire), COMPLETED | FAULTED)
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("state", &self.state())
            .field("token", &self.token())
            .finish()
    }
}

impl<T: Send + 'static> Default for CompletionHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> CompletionHandle<T> {
    /// A standalone handle that is never recycled.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A handle that is handed to `recycler` after its continuation runs.
    #[must_use]
    pub fn with_recycler(recycler: Recycler<T>) -> Self {
        Self::build(Some(recycler))
    }

    fn build(recycler: Option<Recycler<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(PENDING),
                run_async: AtomicBool::new(false),
                recycled: AtomicBool::new(false),
                release_requested: AtomicBool::new(false),
                token: AtomicU64::new(0),
                slot: Mutex::new(Slot {
                    continuation: None,
                    value: None,
                    error: None,
                }),
                resolved: Condvar::new(),
                recycler,
            }),
        }
    }

    /// Run the continuation on the shared worker instead of the resolving thread.
    pub fn set_run_continuation_async(&self, run_async: bool) {
        self.inner.run_async.store(run_async, Ordering::Release);
    }

    #[must_use]
    pub fn run_continuation_async(&self) -> bool {
        self.inner.run_async.load(Ordering::Acquire)
    }

    /// Register the single continuation.
    ///
    /// Runs it immediately (inline or posted) if the handle already resolved.
    ///
    /// # Errors
    ///
    /// [`HutchError::ContinuationAlreadySet`] if one is already waiting.
    pub fn on_completed<F>(&self, continuation: F) -> Result<()>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let mut slot = self.inner.slot.lock();
        if self.is_resolved() {
            drop(slot);
            self.dispatch(Box::new(continuation));
            return Ok(());
        }
        if slot.continuation.is_some() {
            return Err(HutchError::ContinuationAlreadySet);
        }
        slot.continuation = Some(Box::new(continuation));
        Ok(())
    }

    /// Resolve with a value. Returns `true` if this call won.
    pub fn try_set_result(&self, value: T) -> bool {
        self.resolve(COMPLETED, |slot| slot.value = Some(value))
    }

    /// Fault with an error. Returns `true` if this call won.
    pub fn try_set_exception(&self, error: HutchError) -> bool {
        self.resolve(FAULTED, |slot| slot.error = Some(error))
    }

    fn resolve(&self, outcome: u8, store: impl FnOnce(&mut Slot<T>)) -> bool {
        if self
            .inner
            .state
            .compare_exchange(PENDING, RESOLVING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let continuation = {
            let mut slot = self.inner.slot.lock();
            store(&mut slot);
            self.inner.state.store(outcome, Ordering::SeqCst);
            self.inner.resolved.notify_all();
            slot.continuation.take()
        };

        match continuation {
            Some(continuation) => self.dispatch(continuation),
            // Released while pending: recycle now that the use is over.
            None if self.inner.release_requested.load(Ordering::SeqCst) => self.recycle(),
            None => {}
        }
        true
    }

    fn dispatch(&self, continuation: Continuation<T>) {
        let handle = self.clone();
        let run = move || {
            continuation(&handle);
            handle.release();
        };
        if self.run_continuation_async() {
            dispatch::post(Box::new(run));
        } else {
            run();
        }
    }

    /// Hand the handle back to its recycler. Happens automatically after a
    /// continuation runs; call it explicitly for handles awaited with `wait`.
    /// Only the first call per use has an effect.
    ///
    /// Releasing a pending handle (say after `wait_timeout` gave up) defers
    /// the recycling until it resolves, so a late resolution can never land
    /// on the next acquirer.
    pub fn release(&self) {
        self.inner.release_requested.store(true, Ordering::SeqCst);
        if !matches!(self.inner.state.load(Ordering::SeqCst), COMPLETED | FAULTED) {
            return;
        }
        self.recycle();
    }

    fn recycle(&self) {
        if self.inner.recycled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(recycler) = &self.inner.recycler {
            recycler(self.clone());
        }
    }

    /// Clear every field and bump the token. Only a pool may call this, and
    /// only before the handle becomes visible to a new acquirer.
    pub(crate) fn reset(&self) {
        let mut slot = self.inner.slot.lock();
        slot.continuation = None;
        slot.value = None;
        slot.error = None;
        self.inner.run_async.store(false, Ordering::Relaxed);
        self.inner.release_requested.store(false, Ordering::Relaxed);
        self.inner.token.fetch_add(1, Ordering::AcqRel);
        self.inner.state.store(PENDING, Ordering::Release);
    }

    /// Arm `release` again once a pool hands the handle to a new acquirer.
    pub(crate) fn mark_acquired(&self) {
        self.inner.recycled.store(false, Ordering::Release);
    }

    /// Block until the handle resolves.
    pub fn wait(&self) {
        let mut slot = self.inner.slot.lock();
        while !self.is_resolved() {
            self.inner.resolved.wait(&mut slot);
        }
    }

    /// Block until the handle resolves or `timeout` elapses.
    ///
    /// Returns `true` if resolved.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while !self.is_resolved() {
            if self.inner.resolved.wait_until(&mut slot, deadline).timed_out() {
                return self.is_resolved();
            }
        }
        true
    }

    /// Move the value (or the error) out of a resolved handle.
    ///
    /// # Errors
    ///
    /// The stored error if faulted; [`HutchError::NotCompleted`] if pending
    /// or if the value was already taken.
    pub fn take_result(&self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        match self.inner.state.load(Ordering::Acquire) {
            COMPLETED => slot.value.take().ok_or(HutchError::NotCompleted),
            FAULTED => Err(slot.error.clone().unwrap_or(HutchError::Closed)),
            _ => Err(HutchError::NotCompleted),
        }
    }
}

impl<T: Clone + Send + 'static> CompletionHandle<T> {
    /// Read the value of a resolved handle, re-raising a stored error.
    ///
    /// # Errors
    ///
    /// The stored error if faulted; [`HutchError::NotCompleted`] if pending.
    pub fn get_result(&self) -> Result<T> {
        let slot = self.inner.slot.lock();
        match self.inner.state.load(Ordering::Acquire) {
            COMPLETED => slot.value.clone().ok_or(HutchError::NotCompleted),
            FAULTED => Err(slot.error.clone().unwrap_or(HutchError::Closed)),
            _ => Err(HutchError::NotCompleted),
        }
    }
}

impl<T: Default + Send + 'static> CompletionHandle<T> {
    /// Resolve with the default value. Returns `true` if this call won.
    pub fn try_set_completed(&self) -> bool {
        self.try_set_result(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn exactly_one_winner_under_contention() {
        for n in 1..=8usize {
            for _ in 0..50 {
                let handle = CompletionHandle::<usize>::new();
                let fired = Arc::new(AtomicUsize::new(0));
                {
                    let fired = Arc::clone(&fired);
                    handle
                        .on_completed(move |_| {
                            fired.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }

                let barrier = Arc::new(Barrier::new(n));
                let winners: usize = (0..n)
                    .map(|i| {
                        let handle = handle.clone();
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            barrier.wait();
                            match i % 3 {
                                0 => handle.try_set_result(i),
                                1 => handle.try_set_exception(HutchError::Closed),
                                _ => handle.try_set_completed(),
                            }
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|t| usize::from(t.join().unwrap()))
                    .sum();

                assert_eq!(winners, 1, "n = {n}");
                assert_eq!(fired.load(Ordering::SeqCst), 1, "n = {n}");
                assert!(handle.is_resolved());
            }
        }
    }

    #[test]
    fn late_continuation_fires_immediately() {
        let handle = CompletionHandle::new();
        assert!(handle.try_set_result(42u32));
        assert!(!handle.try_set_result(7));

        let (tx, rx) = flume::bounded(1);
        handle
            .on_completed(move |h| tx.send(h.get_result().unwrap()).unwrap())
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), 42);
    }

    #[test]
    fn second_continuation_is_rejected() {
        let handle = CompletionHandle::<()>::new();
        handle.on_completed(|_| {}).unwrap();
        assert!(matches!(
            handle.on_completed(|_| {}),
            Err(HutchError::ContinuationAlreadySet)
        ));
    }

    #[test]
    fn get_result_reraises_errors() {
        let handle = CompletionHandle::<u8>::new();
        assert!(matches!(handle.get_result(), Err(HutchError::NotCompleted)));

        handle.try_set_exception(HutchError::transport("reset by peer"));
        assert_eq!(handle.state(), CompletionState::Faulted);
        assert!(matches!(handle.get_result(), Err(HutchError::Transport(_))));
        assert!(matches!(handle.take_result(), Err(HutchError::Transport(_))));
    }

    #[test]
    fn async_continuation_runs_on_worker() {
        let handle = CompletionHandle::<()>::new();
        handle.set_run_continuation_async(true);

        let (tx, rx) = flume::bounded(1);
        handle
            .on_completed(move |_| {
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            })
            .unwrap();
        handle.try_set_completed();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("hutch-continuations"));
    }

    #[test]
    fn wait_blocks_until_resolved() {
        let handle = CompletionHandle::<String>::new();
        assert!(!handle.wait_timeout(Duration::from_millis(10)));

        let resolver = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.try_set_result("done".to_owned());
        });
        handle.wait();
        t.join().unwrap();
        assert_eq!(handle.take_result().unwrap(), "done");
        assert!(matches!(handle.take_result(), Err(HutchError::NotCompleted)));
    }

    #[test]
    fn recycler_runs_once_after_continuation() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&recycled);
        let recycler: Recycler<()> = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = CompletionHandle::with_recycler(recycler);
        handle.on_completed(|_| {}).unwrap();
        handle.try_set_completed();
        handle.release();
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_while_pending_waits_for_resolution() {
        let recycled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&recycled);
        let recycler: Recycler<u8> = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = CompletionHandle::with_recycler(recycler);
        assert!(!handle.wait_timeout(Duration::from_millis(5)));
        handle.release();
        assert_eq!(recycled.load(Ordering::SeqCst), 0);

        assert!(handle.try_set_result(1));
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
        handle.release();
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_shows_state_and_token() {
        let handle = CompletionHandle::<()>::new();
        let text = format!("{handle:?}");
        assert!(text.contains("Pending"), "{text}");
        assert!(text.contains("token: 0"), "{text}");
    }
}
