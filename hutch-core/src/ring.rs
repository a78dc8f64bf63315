//! Single-producer / single-consumer byte ring buffer with read gates.
//!
//! This module is the ONLY place in the crate where unsafe memory
//! manipulation is allowed. The invariants are enforced here so the stream
//! adapters and socket threads above it stay 100% safe.
//!
//! # Cursors
//!
//! `write_cursor` and `read_cursor` are free-running `u32` counters. They wrap
//! around `u32::MAX` and every distance is computed with wrapping arithmetic.
//! The physical offset of a cursor is `cursor & mask`.
//!
//! ```text
//!  floor = min(read_cursor, open gate positions)
//!  0 <= write_cursor - floor <= capacity
//! ```
//!
//! # Gates
//!
//! A gate is an independent, bounded read window opened at the current read
//! cursor. The primary reader may move past the gated bytes (`advance_read`)
//! and keep parsing while a second thread drains the gate. Until the gate is
//! drained or closed, the writer treats the gate position as the read floor,
//! so gated bytes are never overwritten.
//!
//! Gate slots are claimed with a compare-and-swap on a bitmask and published
//! in a second mask only after the slot is initialised, so the writer never
//! observes a half-built gate.
//!
//! # Threading
//!
//! Exactly one thread writes and one thread performs primary reads (which
//! includes opening gates). Each open gate is read by the single holder of
//! its [`Gate`] token.

#![allow(unsafe_code)]

use crate::error::{HutchError, Result};
use crate::shutdown::ShutdownSignal;
use crate::wait::{WaitStrategy, WaitStrategyKind};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Smallest accepted capacity.
pub const MIN_CAPACITY: usize = 32;

/// Largest accepted capacity. Keeps every cursor distance inside `u32`.
pub const MAX_CAPACITY: usize = 1 << 30;

/// Size of the gate table. One bit per slot in a `u32` mask.
pub const MAX_GATES: usize = 32;

/// Backing store alignment (cache line pair, like the slab pages).
const RING_ALIGN: usize = 128;

/// Check that `capacity` is a usable ring size.
///
/// # Errors
///
/// Returns [`HutchError::InvalidCapacity`] for zero, non-power-of-two,
/// below [`MIN_CAPACITY`] or above [`MAX_CAPACITY`].
pub fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity < MIN_CAPACITY || capacity > MAX_CAPACITY || !capacity.is_power_of_two() {
        return Err(HutchError::InvalidCapacity {
            capacity,
            min: MIN_CAPACITY,
        });
    }
    Ok(())
}

/// One slot of the gate table.
struct GateSlot {
    position: AtomicU32,
    remaining: AtomicU32,
    /// Signalled by the writer whenever bytes are committed
    readable: Box<dyn WaitStrategy>,
}

/// Token for an open gate.
///
/// Owned by the one thread that drains the gate. It must be handed back to
/// [`RingBuffer::close_gate`]; the slot stays claimed until then.
#[must_use = "an open gate holds back the writer until it is closed"]
#[derive(Debug)]
pub struct Gate {
    slot: usize,
    length: u32,
}

impl Gate {
    /// Total length of the gated window.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.length
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    const fn bit(&self) -> u32 {
        1 << self.slot
    }
}

/// Fixed-capacity circular byte buffer.
pub struct RingBuffer {
    ptr: NonNull<u8>,
    capacity: u32,
    mask: u32,
    write_cursor: AtomicU32,
    read_cursor: AtomicU32,
    gates: Box<[GateSlot]>,
    /// Slots owned by a `Gate` token
    claimed: AtomicU32,
    /// Slots whose position currently holds back the writer
    active: AtomicU32,
    /// Signalled by the writer, waited on by the primary reader
    readable: Box<dyn WaitStrategy>,
    /// Signalled by readers, waited on by the writer
    writable: Box<dyn WaitStrategy>,
    shutdown: ShutdownSignal,
}

// SAFETY: the byte array is only touched through raw pointers in disjoint
// regions: the writer fills [write, floor + capacity), readers copy from
// [floor, write). Region ownership is handed over through the atomic cursors
// with Release/Acquire ordering.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: same layout as in `with_gate_limit`; the pointer is never
        // handed out beyond this struct's lifetime.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity as usize, RING_ALIGN);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("write_cursor", &self.write_cursor.load(Ordering::Relaxed))
            .field("read_cursor", &self.read_cursor.load(Ordering::Relaxed))
            .field("open_gates", &self.claimed.load(Ordering::Relaxed).count_ones())
            .finish()
    }
}

impl RingBuffer {
    /// Create a ring with the full gate table.
    ///
    /// # Errors
    ///
    /// Fails if `capacity` does not pass [`validate_capacity`].
    pub fn new(capacity: usize, wait: WaitStrategyKind, shutdown: ShutdownSignal) -> Result<Self> {
        Self::with_gate_limit(capacity, MAX_GATES, wait, shutdown)
    }

    /// Create a ring with at most `gate_limit` concurrently open gates.
    ///
    /// # Errors
    ///
    /// Fails on an invalid capacity or a gate limit of 0 or above [`MAX_GATES`].
    pub fn with_gate_limit(
        capacity: usize,
        gate_limit: usize,
        wait: WaitStrategyKind,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        validate_capacity(capacity)?;
        if gate_limit == 0 || gate_limit > MAX_GATES {
            return Err(HutchError::invalid_config(format!(
                "gate limit {gate_limit} outside 1..={MAX_GATES}"
            )));
        }

        // SAFETY: capacity is a non-zero power of two and RING_ALIGN is a
        // power of two, so the layout is valid.
        let ptr = unsafe {
            let layout = Layout::from_size_align_unchecked(capacity, RING_ALIGN);
            let raw = alloc_zeroed(layout);
            if raw.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            NonNull::new_unchecked(raw)
        };

        let gates = (0..gate_limit)
            .map(|_| GateSlot {
                position: AtomicU32::new(0),
                remaining: AtomicU32::new(0),
                readable: wait.build(),
            })
            .collect();

        Ok(Self {
            ptr,
            capacity: capacity as u32,
            mask: (capacity - 1) as u32,
            write_cursor: AtomicU32::new(0),
            read_cursor: AtomicU32::new(0),
            gates,
            claimed: AtomicU32::new(0),
            active: AtomicU32::new(0),
            readable: wait.build(),
            writable: wait.build(),
            shutdown,
        })
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Number of gate slots in the table.
    #[inline]
    #[must_use]
    pub fn gate_limit(&self) -> usize {
        self.gates.len()
    }

    /// Number of gates currently claimed.
    #[inline]
    #[must_use]
    pub fn open_gates(&self) -> usize {
        self.claimed.load(Ordering::Acquire).count_ones() as usize
    }

    /// Bytes committed by the writer and not yet consumed by the primary reader.
    #[inline]
    #[must_use]
    pub fn available_to_read(&self) -> usize {
        let write = self.write_cursor.load(Ordering::Acquire);
        let read = self.read_cursor.load(Ordering::Acquire);
        write.wrapping_sub(read) as usize
    }

    /// Free space for the writer, measured from the lowest open gate.
    #[inline]
    #[must_use]
    pub fn available_to_write(&self) -> usize {
        let write = self.write_cursor.load(Ordering::Acquire);
        (self.capacity - write.wrapping_sub(self.read_floor(write))) as usize
    }

    /// The shutdown flag this ring observes.
    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Raise the shared shutdown flag and wake every waiter.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.wake_all();
    }

    /// Wake every waiter on this ring without changing state.
    pub fn wake_all(&self) {
        self.readable.signal();
        self.writable.signal();
        for gate in self.gates.iter() {
            gate.readable.signal();
        }
    }

    /// Block until the primary reader has something to read or shutdown is raised.
    pub fn wait_readable(&self) {
        while self.available_to_read() == 0 && !self.shutdown.is_cancelled() {
            self.readable.wait();
        }
    }

    // =========================
    // Writer side
    // =========================

    /// Copy bytes from `src` into free space.
    ///
    /// With `block_until_all`, waits for the readers until every byte is
    /// copied (or shutdown is raised). Otherwise copies what fits and returns.
    ///
    /// # Errors
    ///
    /// [`HutchError::RequestTooLarge`] if `src` is longer than the capacity.
    pub fn write(&self, src: &[u8], block_until_all: bool) -> Result<usize> {
        self.check_request(src.len())?;

        let mut written = 0;
        loop {
            let n = self.write_some(&src[written..]);
            written += n;
            if n > 0 {
                self.notify_readers();
            }
            if written == src.len() || !block_until_all || self.shutdown.is_cancelled() {
                return Ok(written);
            }
            if n == 0 {
                self.writable.wait();
            }
        }
    }

    /// Lowest position still owed to a reader: the read cursor or an active gate.
    ///
    /// "Lowest" is the one furthest behind `write` in wrapping distance.
    fn read_floor(&self, write: u32) -> u32 {
        let mut floor = self.read_cursor.load(Ordering::Acquire);
        let mut distance = write.wrapping_sub(floor);

        let mut active = self.active.load(Ordering::Acquire);
        while active != 0 {
            let slot = active.trailing_zeros() as usize;
            active &= active - 1;

            let position = self.gates[slot].position.load(Ordering::Acquire);
            let behind = write.wrapping_sub(position);
            if behind > distance {
                distance = behind;
                floor = position;
            }
        }
        floor
    }

    fn write_some(&self, src: &[u8]) -> usize {
        let write = self.write_cursor.load(Ordering::Relaxed);
        let used = write.wrapping_sub(self.read_floor(write));
        let free = (self.capacity - used) as usize;

        let n = free.min(src.len());
        if n == 0 {
            return 0;
        }

        let offset = (write & self.mask) as usize;
        let first = n.min(self.capacity as usize - offset);

        // SAFETY: [offset, offset + first) and [0, n - first) lie inside the
        // allocation and inside the free region, which no reader touches.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), first);
            if n > first {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), self.ptr.as_ptr(), n - first);
            }
        }

        self.write_cursor
            .store(write.wrapping_add(n as u32), Ordering::Release);
        n
    }

    fn notify_readers(&self) {
        self.readable.signal();
        let mut active = self.active.load(Ordering::Acquire);
        while active != 0 {
            let slot = active.trailing_zeros() as usize;
            active &= active - 1;
            self.gates[slot].readable.signal();
        }
    }

    // =========================
    // Primary reader side
    // =========================

    /// Copy committed bytes into `dst`, advancing the read cursor.
    ///
    /// With `block_until_full`, waits for the writer until `dst` is full (or
    /// shutdown is raised). Otherwise returns what is available, possibly 0.
    ///
    /// # Errors
    ///
    /// [`HutchError::RequestTooLarge`] if `dst` is longer than the capacity.
    pub fn read(&self, dst: &mut [u8], block_until_full: bool) -> Result<usize> {
        self.check_request(dst.len())?;

        let mut filled = 0;
        loop {
            let n = self.read_some(&mut dst[filled..]);
            filled += n;
            if n > 0 {
                self.writable.signal();
            }
            if filled == dst.len() || !block_until_full || self.shutdown.is_cancelled() {
                return Ok(filled);
            }
            if n == 0 {
                self.readable.wait();
            }
        }
    }

    fn read_some(&self, dst: &mut [u8]) -> usize {
        let read = self.read_cursor.load(Ordering::Relaxed);
        let write = self.write_cursor.load(Ordering::Acquire);
        let n = (write.wrapping_sub(read) as usize).min(dst.len());
        if n == 0 {
            return 0;
        }

        self.copy_out(read, &mut dst[..n]);
        self.read_cursor
            .store(read.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Move the read cursor past `count` committed bytes without copying them.
    ///
    /// Used to step the primary parser over a region handed to a gate.
    /// `count` may exceed the capacity: the call then relies on the gate
    /// reader to free space while it waits.
    ///
    /// Returns the number of bytes skipped, short only on shutdown or when
    /// `block` is false.
    pub fn advance_read(&self, count: usize, block: bool) -> usize {
        let mut skipped = 0;
        loop {
            let read = self.read_cursor.load(Ordering::Relaxed);
            let write = self.write_cursor.load(Ordering::Acquire);
            let n = (write.wrapping_sub(read) as usize).min(count - skipped);
            if n > 0 {
                self.read_cursor
                    .store(read.wrapping_add(n as u32), Ordering::Release);
                skipped += n;
                self.writable.signal();
            }
            if skipped == count || !block || self.shutdown.is_cancelled() {
                return skipped;
            }
            if n == 0 {
                self.readable.wait();
            }
        }
    }

    // =========================
    // Gates
    // =========================

    /// Open a gate of `length` bytes at the current read cursor.
    ///
    /// Must be called from the primary reader thread.
    ///
    /// # Errors
    ///
    /// [`HutchError::GateTableFull`] when every slot is claimed.
    pub fn open_gate(&self, length: u32) -> Result<Gate> {
        let limit_mask = if self.gates.len() == MAX_GATES {
            u32::MAX
        } else {
            (1u32 << self.gates.len()) - 1
        };

        loop {
            let claimed = self.claimed.load(Ordering::Acquire);
            let free = !claimed & limit_mask;
            if free == 0 {
                return Err(HutchError::GateTableFull {
                    capacity: self.gates.len(),
                });
            }

            let slot = free.trailing_zeros() as usize;
            let bit = 1u32 << slot;
            if self
                .claimed
                .compare_exchange_weak(claimed, claimed | bit, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let gate = &self.gates[slot];
            gate.position
                .store(self.read_cursor.load(Ordering::Acquire), Ordering::Relaxed);
            gate.remaining.store(length, Ordering::Relaxed);
            if length > 0 {
                self.active.fetch_or(bit, Ordering::Release);
            }

            trace!(slot, length, "gate opened");
            return Ok(Gate { slot, length });
        }
    }

    /// Bytes still owed to `gate`.
    #[must_use]
    pub fn gate_remaining(&self, gate: &Gate) -> u32 {
        self.gates[gate.slot].remaining.load(Ordering::Acquire)
    }

    /// Copy bytes from the gate's private window into `dst`.
    ///
    /// Never touches the primary read cursor. When the window is exhausted
    /// the gate stops holding back the writer; the token must still be
    /// closed to free the slot.
    ///
    /// # Errors
    ///
    /// [`HutchError::RequestTooLarge`] if `dst` is longer than the capacity.
    pub fn read_gate(&self, gate: &Gate, dst: &mut [u8], block_until_full: bool) -> Result<usize> {
        self.check_request(dst.len())?;

        let slot = &self.gates[gate.slot];
        let mut filled = 0;
        loop {
            let position = slot.position.load(Ordering::Relaxed);
            let remaining = slot.remaining.load(Ordering::Relaxed);
            if remaining == 0 {
                return Ok(filled);
            }

            let write = self.write_cursor.load(Ordering::Acquire);
            let n = (write.wrapping_sub(position) as usize)
                .min(remaining as usize)
                .min(dst.len() - filled);

            if n > 0 {
                self.copy_out(position, &mut dst[filled..filled + n]);
                filled += n;
                slot.position
                    .store(position.wrapping_add(n as u32), Ordering::Release);
                let left = remaining - n as u32;
                slot.remaining.store(left, Ordering::Release);
                if left == 0 {
                    self.active.fetch_and(!gate.bit(), Ordering::AcqRel);
                }
                self.writable.signal();
                if left == 0 {
                    return Ok(filled);
                }
            }

            if filled == dst.len() || !block_until_full || self.shutdown.is_cancelled() {
                return Ok(filled);
            }
            if n == 0 {
                slot.readable.wait();
            }
        }
    }

    /// Release a gate, whether drained or not, and re-signal the writer.
    pub fn close_gate(&self, gate: Gate) {
        let bit = gate.bit();
        self.gates[gate.slot].remaining.store(0, Ordering::Relaxed);
        self.active.fetch_and(!bit, Ordering::AcqRel);
        self.claimed.fetch_and(!bit, Ordering::Release);
        self.writable.signal();
        trace!(slot = gate.slot, "gate closed");
    }

    // =========================
    // Helpers
    // =========================

    #[inline]
    fn check_request(&self, len: usize) -> Result<()> {
        if len > self.capacity as usize {
            return Err(HutchError::RequestTooLarge {
                requested: len,
                capacity: self.capacity as usize,
            });
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at cursor `from`, handling the wrap.
    fn copy_out(&self, from: u32, dst: &mut [u8]) {
        let n = dst.len();
        let offset = (from & self.mask) as usize;
        let first = n.min(self.capacity as usize - offset);

        // SAFETY: callers only pass windows between a read position and the
        // write cursor, which the writer will not touch until the position
        // moves past them.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), first);
            if n > first {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst.as_mut_ptr().add(first), n - first);
            }
        }
    }

    /// Start both cursors at `at` (exercises `u32` wraparound in tests).
    #[cfg(test)]
    fn seed_cursors(&self, at: u32) {
        self.write_cursor.store(at, Ordering::SeqCst);
        self.read_cursor.store(at, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn new_ring(capacity: usize) -> RingBuffer {
        RingBuffer::new(capacity, WaitStrategyKind::Blocking, ShutdownSignal::new()).unwrap()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn capacity_validation() {
        for bad in [0, 1, 16, 31, 100, 1000] {
            assert!(
                matches!(validate_capacity(bad), Err(HutchError::InvalidCapacity { .. })),
                "{bad} should be rejected"
            );
        }
        for good in [32, 64, 1024, 512 * 1024] {
            assert!(validate_capacity(good).is_ok(), "{good} should be accepted");
        }
        assert!(RingBuffer::new(100, WaitStrategyKind::Spin, ShutdownSignal::new()).is_err());
    }

    #[test]
    fn write_read_across_wrap() {
        let ring = new_ring(32);

        let first = pattern(30, 1);
        assert_eq!(ring.write(&first, false).unwrap(), 30);
        let mut out = vec![0u8; 30];
        assert_eq!(ring.read(&mut out, false).unwrap(), 30);
        assert_eq!(out, first);

        let second = pattern(31, 2);
        assert_eq!(ring.write(&second, false).unwrap(), 31);
        let mut out = vec![0u8; 31];
        assert_eq!(ring.read(&mut out, false).unwrap(), 31);
        assert_eq!(out, second);
    }

    #[test]
    fn partial_transfers_without_blocking() {
        let ring = new_ring(32);
        assert_eq!(ring.write(&[0xAA; 20], false).unwrap(), 20);
        assert_eq!(ring.write(&[0xBB; 20], false).unwrap(), 12);
        assert_eq!(ring.available_to_write(), 0);

        let mut out = [0u8; 32];
        assert_eq!(ring.read(&mut out[..8], false).unwrap(), 8);
        assert_eq!(ring.available_to_read(), 24);
        assert_eq!(ring.available_to_write(), 8);

        let empty = new_ring(64);
        let mut buf = [0u8; 4];
        assert_eq!(empty.read(&mut buf, false).unwrap(), 0);
        assert_eq!(empty.available_to_write(), 64);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let ring = new_ring(32);
        assert!(matches!(
            ring.write(&[0u8; 33], false),
            Err(HutchError::RequestTooLarge { requested: 33, capacity: 32 })
        ));
        let mut big = [0u8; 64];
        assert!(ring.read(&mut big, true).is_err());
    }

    #[test]
    fn cursors_survive_u32_wraparound() {
        let ring = new_ring(64);
        ring.seed_cursors(u32::MAX - 40);

        for round in 0..8u8 {
            let data = pattern(50, round);
            assert_eq!(ring.write(&data, true).unwrap(), 50);
            let mut out = vec![0u8; 50];
            assert_eq!(ring.read(&mut out, true).unwrap(), 50);
            assert_eq!(out, data, "round {round}");
        }
        assert_eq!(ring.available_to_read(), 0);
        assert_eq!(ring.available_to_write(), 64);
    }

    #[test]
    fn blocking_transfer_between_threads() {
        for kind in [WaitStrategyKind::Blocking, WaitStrategyKind::Spin] {
            let ring = Arc::new(RingBuffer::new(64, kind, ShutdownSignal::new()).unwrap());
            let total = 64 * 1024;
            let input = pattern(total, 9);

            let producer = {
                let ring = Arc::clone(&ring);
                let input = input.clone();
                thread::spawn(move || {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
                    let mut sent = 0;
                    while sent < input.len() {
                        let chunk = rng.gen_range(1..=64).min(input.len() - sent);
                        sent += ring.write(&input[sent..sent + chunk], true).unwrap();
                    }
                })
            };

            let mut rng = rand::rngs::StdRng::seed_from_u64(11);
            let mut output = Vec::with_capacity(total);
            let mut buf = [0u8; 64];
            while output.len() < total {
                let want = rng.gen_range(1..=64).min(total - output.len());
                let n = ring.read(&mut buf[..want], true).unwrap();
                output.extend_from_slice(&buf[..n]);
            }
            producer.join().unwrap();
            assert_eq!(output, input);
        }
    }

    #[test]
    fn gate_holds_back_writer() {
        let ring = new_ring(32);
        let body = pattern(16, 3);
        ring.write(&body, false).unwrap();

        let gate = ring.open_gate(16).unwrap();
        assert_eq!(ring.advance_read(16, false), 16);
        assert_eq!(ring.available_to_read(), 0);

        // Only the 16 bytes past the gated window are free.
        assert_eq!(ring.available_to_write(), 16);
        assert_eq!(ring.write(&[0xFF; 32], false).unwrap(), 16);

        let mut out = [0u8; 16];
        assert_eq!(ring.read_gate(&gate, &mut out, true).unwrap(), 16);
        assert_eq!(out.as_slice(), body.as_slice());
        assert_eq!(ring.gate_remaining(&gate), 0);

        ring.close_gate(gate);
        assert_eq!(ring.open_gates(), 0);

        let mut tail = [0u8; 16];
        ring.read(&mut tail, true).unwrap();
        assert_eq!(tail, [0xFF; 16]);
        assert_eq!(ring.available_to_write(), 32);
    }

    #[test]
    fn closing_undrained_gate_restores_space() {
        let ring = new_ring(32);
        ring.write(&[1u8; 24], false).unwrap();
        let gate = ring.open_gate(24).unwrap();
        ring.advance_read(24, true);
        assert_eq!(ring.available_to_write(), 8);

        ring.close_gate(gate);
        assert_eq!(ring.available_to_write(), 32);
    }

    #[test]
    fn gate_drained_concurrently_with_writer() {
        // Body larger than the ring: the gate reader frees space while the
        // primary reader waits in advance_read.
        let ring = Arc::new(new_ring(64));
        let body = pattern(1000, 5);

        let gate = {
            ring.write(&body[..10], false).unwrap();
            ring.open_gate(body.len() as u32).unwrap()
        };

        let writer = {
            let ring = Arc::clone(&ring);
            let body = body.clone();
            thread::spawn(move || {
                let mut sent = 10;
                while sent < body.len() {
                    let end = (sent + 48).min(body.len());
                    sent += ring.write(&body[sent..end], true).unwrap();
                }
            })
        };

        let drainer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut out = Vec::new();
                let mut buf = [0u8; 32];
                while ring.gate_remaining(&gate) > 0 {
                    let n = ring.read_gate(&gate, &mut buf, false).unwrap();
                    out.extend_from_slice(&buf[..n]);
                    if n == 0 {
                        thread::yield_now();
                    }
                }
                ring.close_gate(gate);
                out
            })
        };

        assert_eq!(ring.advance_read(body.len(), true), body.len());
        writer.join().unwrap();
        assert_eq!(drainer.join().unwrap(), body);
    }

    #[test]
    fn gate_table_exhaustion_is_fatal_to_the_caller() {
        let ring = RingBuffer::with_gate_limit(64, 4, WaitStrategyKind::Blocking, ShutdownSignal::new()).unwrap();
        let gates: Vec<_> = (0..4).map(|_| ring.open_gate(1).unwrap()).collect();
        assert!(matches!(ring.open_gate(1), Err(HutchError::GateTableFull { capacity: 4 })));

        for gate in gates {
            ring.close_gate(gate);
        }
        let gate = ring.open_gate(1).unwrap();
        ring.close_gate(gate);
    }

    #[test]
    fn full_gate_table_uses_every_bit() {
        let ring = new_ring(32);
        let gates: Vec<_> = (0..MAX_GATES).map(|_| ring.open_gate(0).unwrap()).collect();
        assert_eq!(ring.open_gates(), MAX_GATES);
        assert!(ring.open_gate(0).is_err());
        for gate in gates {
            ring.close_gate(gate);
        }
        assert_eq!(ring.open_gates(), 0);
    }

    #[test]
    fn cancel_unblocks_reader_and_writer() {
        let ring = Arc::new(new_ring(32));

        let reader = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                ring.read(&mut buf, true).unwrap()
            })
        };

        ring.write(&[0u8; 4], false).unwrap();
        thread::sleep(Duration::from_millis(20));
        ring.cancel();
        assert_eq!(reader.join().unwrap(), 4);

        // Writer on a full ring returns short once cancelled.
        let full = ring.write(&[0u8; 32], true).unwrap();
        assert!(full <= 32);
        assert!(ring.shutdown_signal().is_cancelled());
    }
}
