//! Sequential `std::io` views over a [`RingBuffer`].
//!
//! The frame codec only ever sees `io::Read` / `io::Write`; these adapters
//! hide the cursor and gate mechanics behind them.
//!
//! - [`RingReader`]: primary consumer view. Blocks until at least one byte is
//!   available and reports end-of-stream once shutdown is raised and the ring
//!   is drained.
//! - [`RingWriter`]: producer view. Splits requests larger than the ring and
//!   blocks on backpressure.
//! - [`GatedReader`]: reads one gate's window. Closes the gate on drop.

use crate::error::{HutchError, Result};
use crate::ring::{Gate, RingBuffer};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::sync::Arc;

fn into_io(err: HutchError) -> io::Error {
    match err {
        HutchError::Io(e) => io::Error::new(e.kind(), e.to_string()),
        other => io::Error::new(io::ErrorKind::InvalidInput, other),
    }
}

/// Primary reader over a ring buffer.
#[derive(Debug, Clone)]
pub struct RingReader {
    ring: Arc<RingBuffer>,
}

impl RingReader {
    #[must_use]
    pub const fn new(ring: Arc<RingBuffer>) -> Self {
        Self { ring }
    }

    #[must_use]
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Skip `count` bytes without copying them.
    ///
    /// # Errors
    ///
    /// `UnexpectedEof` if shutdown is raised before every byte arrived.
    pub fn skip(&mut self, count: usize) -> io::Result<()> {
        if self.ring.advance_read(count, true) < count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "ring shut down while skipping",
            ));
        }
        Ok(())
    }

    /// Open a gate over the next `length` bytes.
    ///
    /// The bytes are not consumed from this reader; call [`skip`](Self::skip)
    /// to step over them.
    ///
    /// # Errors
    ///
    /// [`HutchError::GateTableFull`] when no gate slot is free.
    pub fn open_gate(&self, length: u32) -> Result<GatedReader> {
        let gate = self.ring.open_gate(length)?;
        Ok(GatedReader {
            ring: Arc::clone(&self.ring),
            gate: Some(gate),
        })
    }
}

impl io::Read for RingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.ring.capacity());
        loop {
            let n = self.ring.read(&mut buf[..want], false).map_err(into_io)?;
            if n > 0 {
                return Ok(n);
            }
            if self.ring.shutdown_signal().is_cancelled() {
                return Ok(0);
            }
            self.ring.wait_readable();
        }
    }
}

/// Producer view over a ring buffer.
#[derive(Debug, Clone)]
pub struct RingWriter {
    ring: Arc<RingBuffer>,
}

impl RingWriter {
    #[must_use]
    pub const fn new(ring: Arc<RingBuffer>) -> Self {
        Self { ring }
    }

    #[must_use]
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }
}

impl io::Write for RingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = buf.len().min(self.ring.capacity());
        let n = self.ring.write(&buf[..chunk], true).map_err(into_io)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "ring shut down while writing",
            ));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader over one gate's window.
#[derive(Debug)]
pub struct GatedReader {
    ring: Arc<RingBuffer>,
    gate: Option<Gate>,
}

impl GatedReader {
    /// Total length of the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gate.as_ref().map_or(0, |g| g.len() as usize)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes not yet read from the window.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.gate
            .as_ref()
            .map_or(0, |g| self.ring.gate_remaining(g) as usize)
    }

    /// Read the rest of the window into one contiguous buffer.
    ///
    /// # Errors
    ///
    /// `UnexpectedEof` if shutdown is raised before the window is complete.
    pub fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let mut out = BytesMut::with_capacity(self.remaining());
        let mut chunk = vec![0u8; self.remaining().clamp(1, 64 * 1024).min(self.ring.capacity())];
        while self.remaining() > 0 {
            let n = io::Read::read(self, &mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "ring shut down inside gated window",
                ));
            }
            out.put_slice(&chunk[..n]);
        }
        Ok(out.freeze())
    }

    /// Close the gate now instead of on drop.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(gate) = self.gate.take() {
            self.ring.close_gate(gate);
        }
    }
}

impl io::Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(gate) = self.gate.as_ref() else {
            return Ok(0);
        };
        let remaining = self.ring.gate_remaining(gate) as usize;
        let want = buf.len().min(remaining).min(self.ring.capacity());
        if want == 0 {
            return Ok(0);
        }
        self.ring
            .read_gate(gate, &mut buf[..want], true)
            .map_err(into_io)
    }
}

impl Drop for GatedReader {
    fn drop(&mut self) {
        self.release();
    }
}
