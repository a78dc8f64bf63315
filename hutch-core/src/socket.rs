//! Socket pumps: one dedicated thread per socket direction.
//!
//! ```text
//!   socket ──read──▶ SocketProducer ──write──▶ input RingBuffer
//!   output RingBuffer ──read──▶ SocketConsumer ──write──▶ socket
//! ```
//!
//! Any socket-level failure (error or EOF) is reported once through the
//! failure hook, which the connection turns into an abrupt close.

use crate::error::HutchError;
use crate::ring::RingBuffer;
use crate::transport::Transport;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Callback invoked when a socket pump stops on a failure.
pub type FailureHook = Arc<dyn Fn(HutchError) + Send + Sync>;

/// A named background loop thread that can be joined once.
#[derive(Debug, Default)]
pub struct LoopThread {
    handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawn `body` on a new thread called `name`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_owned()).spawn(body)?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit. No-op when called from the thread itself
    /// or when already joined.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("loop thread panicked");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Fills an input ring from socket reads.
#[derive(Debug)]
pub struct SocketProducer {
    thread: LoopThread,
}

impl SocketProducer {
    /// Start the producer thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn<T: Transport>(
        mut socket: T,
        ring: Arc<RingBuffer>,
        chunk_size: usize,
        on_failure: FailureHook,
    ) -> io::Result<Self> {
        let chunk = chunk_size.clamp(1, ring.capacity());
        let thread = LoopThread::spawn("hutch-socket-rx", move || {
            let shutdown = ring.shutdown_signal().clone();
            let mut scratch = vec![0u8; chunk];
            debug!(chunk, "socket producer started");

            while !shutdown.is_cancelled() {
                match socket.read(&mut scratch) {
                    Ok(0) => {
                        if !shutdown.is_cancelled() {
                            on_failure(HutchError::transport("connection closed by peer"));
                        }
                        break;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "socket read");
                        match ring.write(&scratch[..n], true) {
                            Ok(written) if written == n => {}
                            Ok(_) => break,
                            Err(e) => {
                                on_failure(e);
                                break;
                            }
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        if !shutdown.is_cancelled() {
                            on_failure(HutchError::transport(format!("socket read failed: {e}")));
                        }
                        break;
                    }
                }
            }
            debug!("socket producer stopped");
        })?;
        Ok(Self { thread })
    }

    pub fn join(&mut self) {
        self.thread.join();
    }
}

/// Drains an output ring into socket writes.
#[derive(Debug)]
pub struct SocketConsumer {
    thread: LoopThread,
}

impl SocketConsumer {
    /// Start the consumer thread.
    ///
    /// After shutdown is raised the thread keeps writing until the ring is
    /// empty, so a final close method still reaches the wire, then shuts the
    /// socket down in both directions.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn<T: Transport>(
        mut socket: T,
        ring: Arc<RingBuffer>,
        chunk_size: usize,
        on_failure: FailureHook,
    ) -> io::Result<Self> {
        let chunk = chunk_size.clamp(1, ring.capacity());
        let thread = LoopThread::spawn("hutch-socket-tx", move || {
            let shutdown = ring.shutdown_signal().clone();
            let mut scratch = vec![0u8; chunk];
            debug!(chunk, "socket consumer started");

            loop {
                ring.wait_readable();
                let n = match ring.read(&mut scratch, false) {
                    Ok(n) => n,
                    Err(e) => {
                        on_failure(e);
                        break;
                    }
                };
                if n == 0 {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    continue;
                }
                if let Err(e) = socket.write_all(&scratch[..n]).and_then(|()| socket.flush()) {
                    if !shutdown.is_cancelled() {
                        on_failure(HutchError::transport(format!("socket write failed: {e}")));
                    }
                    break;
                }
                trace!(bytes = n, "socket write");
            }
            if shutdown.is_cancelled() {
                // Everything committed is on the wire; unblock the producer's read.
                if let Err(e) = socket.shutdown_both() {
                    trace!("socket shutdown: {e}");
                }
            }
            debug!("socket consumer stopped");
        })?;
        Ok(Self { thread })
    }

    pub fn join(&mut self) {
        self.thread.join();
    }
}
