//! Process-wide worker for asynchronous continuations.
//!
//! Completion handles flagged `run_continuation_async` post their
//! continuation here instead of running it on the thread that resolved them
//! (usually the frame reader, which must not be held up by application code).

use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use tracing::{error, warn};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

static DISPATCHER: Lazy<ContinuationDispatcher> = Lazy::new(ContinuationDispatcher::start);

/// Single worker thread fed by an unbounded channel.
#[derive(Debug)]
pub struct ContinuationDispatcher {
    tx: flume::Sender<Job>,
}

impl ContinuationDispatcher {
    fn start() -> Self {
        let (tx, rx) = flume::unbounded::<Job>();
        let spawned = thread::Builder::new()
            .name("hutch-continuations".into())
            .spawn(move || {
                for job in rx.iter() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("continuation panicked");
                    }
                }
            });
        if let Err(e) = spawned {
            // The receiver is gone with the closure; `post` falls back to inline.
            error!("failed to start continuation worker: {e}");
        }
        Self { tx }
    }

    /// Queue `job`; runs it inline if the worker is unavailable.
    pub fn post(&self, job: Job) {
        if let Err(flume::SendError(job)) = self.tx.send(job) {
            job();
        }
    }
}

/// Run `job` on the shared continuation worker.
pub fn post(job: Job) {
    DISPATCHER.post(job);
}
