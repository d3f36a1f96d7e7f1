// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Result-set arena: per-channel vector of writer ring buffers with
// producer-chosen writers and a round-robin-style consumer (§4.B, §4.C).
// Port of tateyama::common::wire::unidirectional_simple_wires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{IpcError, Result};
use crate::waiter::Waiter;
use crate::wire::headers::{LengthHeader, LENGTH_HEADER_SIZE};
use crate::wire::ring::{ByteRing, DEFAULT_WAIT_MS};

struct Slot {
    ring: ByteRing,
    attached: bool,
    /// Set once `brand_new` has reserved header space for the writer
    /// currently bound to this slot; cleared on `commit`.
    continued: bool,
}

/// A channel's fixed arena of `writer_count` independent ring buffers.
pub struct ResultsetArena {
    slots: Mutex<Vec<Slot>>,
    record_arrival: Waiter,
    eor: AtomicBool,
    closed: AtomicBool,
}

impl ResultsetArena {
    /// # Safety
    /// Each `(base, capacity)` pair in `slot_buffers` must point to valid,
    /// exclusively-owned memory for the lifetime of the returned arena.
    pub unsafe fn attach(
        name: &str,
        slot_buffers: Vec<(*mut u8, usize)>,
        is_creator: bool,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(slot_buffers.len());
        for (i, (base, capacity)) in slot_buffers.into_iter().enumerate() {
            let ring =
                ByteRing::attach(base, capacity, &format!("{name}_SLOT{i}"), is_creator)?;
            slots.push(Slot {
                ring,
                attached: false,
                continued: false,
            });
        }
        Ok(Self {
            slots: Mutex::new(slots),
            record_arrival: Waiter::open(&format!("{name}_RECORD"))?,
            eor: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn writer_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Acquire a free slot, blocking if `writer_count` writers are already
    /// active. Mirrors `unidirectional_simple_wires::acquire`.
    pub fn acquire(&self) -> Result<usize> {
        loop {
            {
                let mut slots = self.slots.lock().unwrap();
                if let Some((i, s)) = slots.iter_mut().enumerate().find(|(_, s)| !s.attached) {
                    s.attached = true;
                    return Ok(i);
                }
            }
            // No free slot: every writer is in use. Per §8 boundary
            // behavior this blocks until release rather than erroring,
            // consistent with a bounded-concurrency writer pool.
            std::thread::sleep(std::time::Duration::from_millis(5));
            if self.closed.load(Ordering::Acquire) {
                return Err(IpcError::AcquireFailed);
            }
        }
    }

    /// Release a previously acquired slot back to the free pool.
    pub fn release(&self, slot: usize) {
        let mut slots = self.slots.lock().unwrap();
        slots[slot].attached = false;
        slots[slot].continued = false;
    }

    /// Writer-side: begin a new record. Reserves header space; subsequent
    /// `write` calls append payload bytes after it.
    pub fn brand_new(&self, slot: usize) -> Result<()> {
        let ring = self.ring(slot);
        ring.reserve(LENGTH_HEADER_SIZE, DEFAULT_WAIT_MS)?;
        self.slots.lock().unwrap()[slot].continued = true;
        Ok(())
    }

    /// Writer-side: append payload bytes to the record opened by `brand_new`.
    pub fn write(&self, slot: usize, data: &[u8]) -> Result<()> {
        if !self.slots.lock().unwrap()[slot].continued {
            self.brand_new(slot)?;
        }
        let ring = self.ring(slot);
        ring.reserve_and_write(data, DEFAULT_WAIT_MS)?;
        Ok(())
    }

    /// Writer-side: commit the record, making it visible to the consumer,
    /// and wake anyone blocked in `active_wire`.
    pub fn commit(&self, slot: usize) -> Result<()> {
        let mut continued_now = false;
        {
            let mut slots = self.slots.lock().unwrap();
            if slots[slot].continued {
                slots[slot].continued = false;
                continued_now = true;
            }
        }
        if !continued_now {
            return Ok(());
        }
        let ring = self.ring(slot);
        let len = ring.provisional_unflushed_len(LENGTH_HEADER_SIZE) as u32;
        ring.commit(&LengthHeader::new(len).to_bytes())?;
        self.record_arrival.notify()?;
        Ok(())
    }

    fn ring(&self, slot: usize) -> RingRef<'_> {
        RingRef { arena: self, slot }
    }

    fn has_record(&self, slot: usize) -> bool {
        self.slots.lock().unwrap()[slot].ring.stored_valid() > 0
    }

    /// Consumer-side: return any slot with an undisposed record, blocking
    /// (up to `timeout_ms`, or indefinitely if `None`) until one appears
    /// or `set_eor` is called with nothing pending. Scan order is
    /// deterministic (index order), matching the spec's "deterministic
    /// scan order".
    pub fn active_wire(&self, timeout_ms: Option<u64>) -> Result<Option<usize>> {
        loop {
            let count = self.writer_count();
            for i in 0..count {
                if self.has_record(i) {
                    return Ok(Some(i));
                }
            }
            if self.eor.load(Ordering::Acquire) {
                return Ok(None);
            }
            let ok = self
                .record_arrival
                .wait_if(|| true, Some(timeout_ms.unwrap_or(DEFAULT_WAIT_MS)))?;
            if !ok && timeout_ms.is_some() {
                return Err(IpcError::Timeout);
            }
        }
    }

    /// Consumer-side: borrow the next chunk of the active record in
    /// `slot`. If the record straddles the ring's wrap point, the
    /// remainder is returned separately so the caller can concatenate
    /// without an extra copy inside the ring.
    pub fn get_chunk(&self, slot: usize, timeout_ms: u64) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let ring = self.ring(slot);
        ring.wait_for_data(LENGTH_HEADER_SIZE, timeout_ms)?;
        let mut len_buf = [0u8; LENGTH_HEADER_SIZE];
        ring.peek_at(0, &mut len_buf);
        let length = LengthHeader::from_bytes(&len_buf).length as usize;
        ring.wait_for_data(LENGTH_HEADER_SIZE + length, timeout_ms)?;

        let capacity = ring.capacity();
        let read_point = ring.read_point();
        let payload_start = read_point + LENGTH_HEADER_SIZE;
        let page_of = |n: usize| n / capacity;
        if page_of(payload_start) == page_of(payload_start + length.saturating_sub(1).max(0)) {
            let mut out = vec![0u8; length];
            ring.peek_at(LENGTH_HEADER_SIZE, &mut out);
            Ok((out, None))
        } else {
            let first_len = capacity - (payload_start % capacity);
            let mut first = vec![0u8; first_len];
            ring.peek_at(LENGTH_HEADER_SIZE, &mut first);
            let mut rest = vec![0u8; length - first_len];
            ring.peek_at(LENGTH_HEADER_SIZE + first_len, &mut rest);
            Ok((first, Some(rest)))
        }
    }

    /// Consumer-side: reclaim the space occupied by the record most
    /// recently returned by `get_chunk`. Rejects out-of-order disposal
    /// (§9 Open Question 1: forbidden, not best-effort).
    pub fn dispose(&self, slot: usize, expected_read_point: usize) -> Result<()> {
        let ring = self.ring(slot);
        if ring.read_point() != expected_read_point {
            return Err(IpcError::OutOfOrderDispose);
        }
        let mut len_buf = [0u8; LENGTH_HEADER_SIZE];
        ring.peek_at(0, &mut len_buf);
        let length = LengthHeader::from_bytes(&len_buf).length as usize;
        ring.dispose(LENGTH_HEADER_SIZE + length)
    }

    pub fn read_point(&self, slot: usize) -> usize {
        self.ring(slot).read_point()
    }

    /// Mark the end of the result set (called by the producing service).
    pub fn set_eor(&self) -> Result<()> {
        self.eor.store(true, Ordering::Release);
        self.record_arrival.notify()
    }

    pub fn is_eor(&self) -> bool {
        self.eor.load(Ordering::Acquire)
    }

    /// Notify the writers that the consumer is disengaging.
    pub fn set_closed(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let slots = self.slots.lock().unwrap();
        for s in slots.iter() {
            s.ring.close()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Thin borrow wrapper so `ring(slot)` can return something `Deref`-like
/// without holding the `slots` mutex across ring operations (the `ByteRing`
/// itself has no interior mutability needing the arena lock).
struct RingRef<'a> {
    arena: &'a ResultsetArena,
    slot: usize,
}

impl<'a> std::ops::Deref for RingRef<'a> {
    type Target = ByteRing;
    fn deref(&self) -> &ByteRing {
        // Safety: slots never move or get removed after attach(); the Vec
        // is only mutated for the `attached`/`continued` flags under the
        // mutex, never resized, so a reference to a slot's ring outlives
        // the mutex guard used to obtain it.
        let slots = self.arena.slots.lock().unwrap();
        let ring_ptr: *const ByteRing = &slots[self.slot].ring;
        unsafe { &*ring_ptr }
    }
}
