//! Bounded pool of completion handles.
//!
//! Handles are created lazily up to the pool capacity and come back through
//! their recycler, which resets them before pushing them onto a lock-free
//! free list. A handle is therefore never visible to a new acquirer with
//! state left over from its previous use.

use crate::completion::{CompletionHandle, Recycler};
use crate::error::{HutchError, Result};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

struct PoolShared<T> {
    free: ArrayQueue<CompletionHandle<T>>,
    allocated: AtomicUsize,
}

/// Pool of reusable [`CompletionHandle`]s.
pub struct CompletionPool<T> {
    shared: Arc<PoolShared<T>>,
    recycler: Recycler<T>,
}

impl<T> Clone for CompletionPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            recycler: Arc::clone(&self.recycler),
        }
    }
}

impl<T> std::fmt::Debug for CompletionPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPool")
            .field("capacity", &self.shared.free.capacity())
            .field("allocated", &self.shared.allocated.load(Ordering::Relaxed))
            .field("free", &self.shared.free.len())
            .finish()
    }
}

impl<T: Send + 'static> CompletionPool<T> {
    /// Create a pool holding at most `capacity` handles.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let shared = Arc::new(PoolShared {
            free: ArrayQueue::new(capacity),
            allocated: AtomicUsize::new(0),
        });

        let weak: Weak<PoolShared<T>> = Arc::downgrade(&shared);
        let recycler: Recycler<T> = Arc::new(move |handle: CompletionHandle<T>| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            handle.reset();
            if shared.free.push(handle).is_err() {
                // More handles came back than were handed out; let it drop.
                shared.allocated.fetch_sub(1, Ordering::AcqRel);
            }
        });

        Self { shared, recycler }
    }

    /// Take a pending handle from the pool, creating one if below capacity.
    ///
    /// # Errors
    ///
    /// [`HutchError::PoolExhausted`] when every handle is in use.
    pub fn acquire(&self) -> Result<CompletionHandle<T>> {
        if let Some(handle) = self.shared.free.pop() {
            handle.mark_acquired();
            trace!(token = handle.token(), "completion reused");
            return Ok(handle);
        }

        let capacity = self.shared.free.capacity();
        let mut allocated = self.shared.allocated.load(Ordering::Acquire);
        loop {
            if allocated >= capacity {
                return Err(HutchError::PoolExhausted { capacity });
            }
            match self.shared.allocated.compare_exchange_weak(
                allocated,
                allocated + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => allocated = current,
            }
        }
        Ok(CompletionHandle::with_recycler(Arc::clone(&self.recycler)))
    }

    /// Return a handle that never had a continuation. A pending handle only
    /// goes back once it resolves.
    pub fn release(&self, handle: &CompletionHandle<T>) {
        handle.release();
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.free.capacity()
    }

    /// Handles created so far.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }

    /// Handles sitting in the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.free.len()
    }
}
