// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-capacity single-producer/single-consumer byte ring with header
// framing and wrap-around-safe reads (§4.A). Generalizes the teacher's
// `proto::shm_ring::ShmRing<T: Copy, const N: usize>` (fixed-size typed
// slots) to variable-length byte records, grounded on
// `tateyama::common::wire::simple_wire<T>` in original_source's `wire.h`:
// the `pushed` / `pushed_valid` / `poped` three-counter scheme, `room()`,
// `stored_valid()`, and wrap-aware `write_in_buffer`/`read_from_buffer`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{IpcError, Result};
use crate::waiter::Waiter;

/// Default deadline for a single blocking wait on the ring (§5: "Ring-buffer
/// awaits use a timeout of a few seconds; a timeout is converted into a loop
/// iteration for the worker so it can re-check shutdown").
pub const DEFAULT_WAIT_MS: u64 = 5_000;

/// A fixed-capacity byte ring living in a shared-memory region the caller
/// owns (`base`..`base+capacity`). Exactly one producer and one consumer.
///
/// Safety: `base` must point to a region of at least `capacity` bytes that
/// outlives the `ByteRing`, and must not be written to except through this
/// type (or its counterpart handle in the peer process).
pub struct ByteRing {
    base: *mut u8,
    capacity: usize,

    pushed: AtomicUsize,
    pushed_valid: AtomicUsize,
    poped: AtomicUsize,

    closed: AtomicBool,
    waiting_for_read: AtomicBool,
    waiting_for_write: AtomicBool,

    // Two independent process-shared waiters, matching wire.h's two
    // condvars (`c_empty_`, `c_full_`) sharing one mutex; kept as separate
    // named mutex+condvar pairs here since `Waiter` bundles exactly one of
    // each — functionally equivalent, see DESIGN.md.
    data_ready: Waiter,
    room_ready: Waiter,
}

// Safety: the backing bytes are a shared-memory region, shared by design.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Attach to a region of `capacity` bytes at `base`, using `name` to
    /// derive the two waiters' shared-memory names. `is_creator` must be
    /// true for exactly one of the two attaching processes (whichever one
    /// allocated the backing segment); it resets the counters to zero.
    ///
    /// # Safety
    /// `base` must remain valid for the lifetime of the returned `ByteRing`.
    pub unsafe fn attach(
        base: *mut u8,
        capacity: usize,
        name: &str,
        is_creator: bool,
    ) -> Result<Self> {
        let data_ready = Waiter::open(&format!("{name}_DATA"))?;
        let room_ready = Waiter::open(&format!("{name}_ROOM"))?;
        let ring = Self {
            base,
            capacity,
            pushed: AtomicUsize::new(0),
            pushed_valid: AtomicUsize::new(0),
            poped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            waiting_for_read: AtomicBool::new(false),
            waiting_for_write: AtomicBool::new(false),
            data_ready,
            room_ready,
        };
        let _ = is_creator; // counters always start at 0 in fresh shm; kept for symmetry/documentation
        Ok(ring)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn stored(&self) -> usize {
        self.pushed.load(Ordering::Acquire) - self.poped.load(Ordering::Acquire)
    }

    pub fn room(&self) -> usize {
        self.capacity - self.stored()
    }

    pub fn stored_valid(&self) -> usize {
        self.pushed_valid.load(Ordering::Acquire) - self.poped.load(Ordering::Acquire)
    }

    fn index(&self, n: usize) -> usize {
        n % self.capacity
    }

    /// Copy `data` into the ring at the position `capacity`-relative to
    /// `pushed`, wrapping around the end of the backing buffer as needed.
    /// Does not advance any counter.
    fn write_in_buffer(&self, at: usize, data: &[u8]) {
        let start = self.index(at);
        let len = data.len();
        unsafe {
            if start + len <= self.capacity {
                std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(start), len);
            } else {
                let first = self.capacity - start;
                std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(start), first);
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(first),
                    self.base,
                    len - first,
                );
            }
        }
    }

    /// Copy `len` bytes out of the ring starting at the position relative
    /// to `poped`, wrapping as needed.
    fn read_from_buffer(&self, at: usize, out: &mut [u8]) {
        let start = self.index(at);
        let len = out.len();
        unsafe {
            if start + len <= self.capacity {
                std::ptr::copy_nonoverlapping(self.base.add(start), out.as_mut_ptr(), len);
            } else {
                let first = self.capacity - start;
                std::ptr::copy_nonoverlapping(self.base.add(start), out.as_mut_ptr(), first);
                std::ptr::copy_nonoverlapping(
                    self.base,
                    out.as_mut_ptr().add(first),
                    len - first,
                );
            }
        }
    }

    /// Block until `room() >= length` or the ring is closed. Returns an
    /// `IpcError::Timeout` on deadline miss (never spuriously succeeds),
    /// `IpcError::SessionClosed` if the ring was closed while waiting.
    pub fn wait_for_room(&self, length: usize, timeout_ms: u64) -> Result<()> {
        if self.room() >= length {
            return Ok(());
        }
        self.waiting_for_write.store(true, Ordering::Release);
        let ok = self.room_ready.wait_if(
            || self.room() < length && !self.closed.load(Ordering::Acquire),
            Some(timeout_ms),
        )?;
        self.waiting_for_write.store(false, Ordering::Release);
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::SessionClosed);
        }
        if !ok {
            return Err(IpcError::Timeout);
        }
        Ok(())
    }

    /// Block until `stored_valid() >= length` or the ring is closed.
    /// Returns `IpcError::SessionClosed` if the ring was closed before
    /// enough data arrived (checked even if the wait returns because the
    /// predicate went false for that reason, not just on timeout).
    pub fn wait_for_data(&self, length: usize, timeout_ms: u64) -> Result<()> {
        if self.stored_valid() >= length {
            return Ok(());
        }
        self.waiting_for_read.store(true, Ordering::Release);
        let ok = self.data_ready.wait_if(
            || self.stored_valid() < length && !self.closed.load(Ordering::Acquire),
            Some(timeout_ms),
        )?;
        self.waiting_for_read.store(false, Ordering::Release);
        if self.closed.load(Ordering::Acquire) && self.stored_valid() < length {
            return Err(IpcError::SessionClosed);
        }
        if !ok {
            return Err(IpcError::Timeout);
        }
        Ok(())
    }

    /// Reserve `length` bytes at the current `pushed` position (after
    /// waiting for room) and advance `pushed`, without writing any bytes.
    /// Used to reserve space for a header whose contents aren't known
    /// until later writes complete (e.g. a result-set record's length
    /// prefix). Returns the reserved offset.
    pub fn reserve(&self, length: usize, timeout_ms: u64) -> Result<usize> {
        self.wait_for_room(length, timeout_ms)?;
        let at = self.pushed.load(Ordering::Acquire);
        self.pushed.fetch_add(length, Ordering::AcqRel);
        Ok(at)
    }

    /// Write `data` at a previously `reserve`d absolute offset.
    pub fn write_at(&self, at: usize, data: &[u8]) {
        self.write_in_buffer(at, data);
    }

    /// Append `data` at the current `pushed` position (after waiting for
    /// room), advancing `pushed` but *not* `pushed_valid` — the header is
    /// not yet visible to the consumer. Returns the offset the bytes were
    /// written at (relative to the ring's absolute counter space), so the
    /// caller can later write a header at the matching `pushed_valid`
    /// position.
    pub fn reserve_and_write(&self, data: &[u8], timeout_ms: u64) -> Result<usize> {
        let at = self.reserve(data.len(), timeout_ms)?;
        self.write_in_buffer(at, data);
        Ok(at)
    }

    /// Bytes written since the last `commit`, minus `header_size` — the
    /// payload length of a record whose header was pre-reserved via
    /// `reserve` and is about to be filled in and committed.
    pub fn provisional_unflushed_len(&self, header_size: usize) -> usize {
        self.pushed.load(Ordering::Acquire) - self.pushed_valid.load(Ordering::Acquire) - header_size
    }

    /// Write `header` at `pushed_valid`'s current position and advance
    /// `pushed_valid` to `pushed`, making the just-written record visible.
    /// Notifies a waiting consumer iff one is registered.
    pub fn commit(&self, header: &[u8]) -> Result<()> {
        let at = self.pushed_valid.load(Ordering::Acquire);
        self.write_in_buffer(at, header);
        let new_valid = self.pushed.load(Ordering::Acquire);
        self.pushed_valid.store(new_valid, Ordering::Release);
        if self.waiting_for_read.load(Ordering::Acquire) {
            self.data_ready.notify()?;
        }
        Ok(())
    }

    /// Read `len` bytes starting `offset` bytes past `poped` into `out`.
    pub fn peek_at(&self, offset: usize, out: &mut [u8]) {
        let at = self.poped.load(Ordering::Acquire) + offset;
        self.read_from_buffer(at, out);
    }

    /// Advance `poped` by `total_len` (header + payload), reclaiming the
    /// space. Notifies a waiting producer iff one is registered.
    pub fn dispose(&self, total_len: usize) -> Result<()> {
        self.poped.fetch_add(total_len, Ordering::AcqRel);
        if self.waiting_for_write.load(Ordering::Acquire) {
            self.room_ready.notify()?;
        }
        Ok(())
    }

    pub fn read_point(&self) -> usize {
        self.poped.load(Ordering::Acquire)
    }

    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if self.waiting_for_read.load(Ordering::Acquire) {
            self.data_ready.notify()?;
        }
        if self.waiting_for_write.load(Ordering::Acquire) {
            self.room_ready.notify()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_ring(name: &str, capacity: usize) -> (ByteRing, Vec<u8>) {
        let mut buf = vec![0u8; capacity];
        let ring =
            unsafe { ByteRing::attach(buf.as_mut_ptr(), capacity, name, true).unwrap() };
        (ring, buf)
    }

    #[test]
    fn write_then_read_within_capacity() {
        let (ring, _buf) = new_test_ring("ring_basic", 64);
        let payload = b"hello world";
        ring.reserve(4, 1000).unwrap();
        let at = ring.reserve_and_write(payload, 1000).unwrap();
        assert_eq!(at, 4);
        ring.commit(&(payload.len() as u32).to_ne_bytes()).unwrap();
        assert_eq!(ring.stored_valid(), 4 + payload.len());

        let mut len_buf = [0u8; 4];
        ring.peek_at(0, &mut len_buf);
        let len = u32::from_ne_bytes(len_buf) as usize;
        assert_eq!(len, payload.len());

        let mut out = vec![0u8; len];
        ring.peek_at(4, &mut out);
        assert_eq!(&out, payload);

        ring.dispose(4 + len).unwrap();
        assert_eq!(ring.stored_valid(), 0);
    }

    #[test]
    fn wrap_around_record_reads_identically() {
        let (ring, _buf) = new_test_ring("ring_wrap", 16);
        // Push and dispose a few records to advance the cursor near the
        // end of the buffer, forcing the next record to wrap.
        for _ in 0..3 {
            ring.reserve(4, 1000).unwrap();
            ring.reserve_and_write(b"1234", 1000).unwrap();
            ring.commit(&4u32.to_ne_bytes()).unwrap();
            ring.dispose(8).unwrap();
        }
        let payload = b"wraptest";
        ring.reserve(4, 1000).unwrap();
        ring.reserve_and_write(payload, 1000).unwrap();
        ring.commit(&(payload.len() as u32).to_ne_bytes()).unwrap();
        let mut out = vec![0u8; payload.len()];
        ring.peek_at(4, &mut out);
        assert_eq!(&out, payload);
    }

    #[test]
    fn room_and_stored_valid_invariants_hold() {
        let (ring, _buf) = new_test_ring("ring_invariants", 32);
        assert_eq!(ring.room(), 32);
        ring.reserve(4, 1000).unwrap();
        ring.reserve_and_write(b"abcd", 1000).unwrap();
        assert_eq!(ring.room(), 24);
        ring.commit(&4u32.to_ne_bytes()).unwrap();
        assert_eq!(ring.stored_valid(), 8);
    }
}
