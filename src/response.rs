// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Response object and its data-channel state machine (§4.E). Grounded on
// `tateyama::api::server::response` (original_source) for the
// body/body_head/acquire_channel/release_channel surface; the state machine
// itself (`no_data_channel -> to_be_used -> acquired -> released`) and the
// two `acquire_failed`/`release_failed` branches are this transport's own
// formalization of invariants the original only enforces via assertions,
// resolved per SPEC_FULL.md §9's Open Question decisions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{IpcError, Result};
use crate::request::{validate_blob, BlobDescriptor};
use crate::wire::{ResponseType, ResponseWire, ResultsetArena};

#[cfg(test)]
fn test_response_wire(name: &str, capacity: usize) -> (Arc<ResponseWire>, Vec<u8>) {
    let mut buf = vec![0u8; capacity];
    let wire = unsafe { ResponseWire::attach(buf.as_mut_ptr(), capacity, name, true).unwrap() };
    (Arc::new(wire), buf)
}

#[cfg(test)]
fn test_resultset_arena(name: &str, slots: usize, slot_capacity: usize) -> (Arc<ResultsetArena>, Vec<Vec<u8>>) {
    let mut bufs: Vec<Vec<u8>> = (0..slots).map(|_| vec![0u8; slot_capacity]).collect();
    let slot_buffers = bufs.iter_mut().map(|b| (b.as_mut_ptr(), slot_capacity)).collect();
    let arena = unsafe { ResultsetArena::attach(name, slot_buffers, true).unwrap() };
    (Arc::new(arena), bufs)
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    NoDataChannel,
    ToBeUsed,
    Acquired,
    Released,
}

/// The reply side of one request/response pair. Lives in the session's
/// reqres registry (§4.H) from the moment the request is dispatched until
/// its final `body` has been written.
pub struct Response {
    index: u16,
    wire: Arc<ResponseWire>,
    resultset: Arc<ResultsetArena>,
    state: Mutex<ChannelState>,
    body_sent: AtomicBool,
    blobs: Mutex<Vec<BlobDescriptor>>,
    cancelled: Arc<AtomicBool>,
}

impl Response {
    pub fn new(
        index: u16,
        wire: Arc<ResponseWire>,
        resultset: Arc<ResultsetArena>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            index,
            wire,
            resultset,
            state: Mutex::new(ChannelState::NoDataChannel),
            body_sent: AtomicBool::new(false),
            blobs: Mutex::new(Vec::new()),
            cancelled,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    /// Send the final reply body. Valid exactly once per response.
    pub fn body(&self, payload: &[u8]) -> Result<()> {
        if self.body_sent.swap(true, Ordering::AcqRel) {
            return Err(IpcError::IllegalState("body already sent".to_owned()));
        }
        self.wire.write(self.index, ResponseType::Body, payload)
    }

    /// Send a preliminary header ahead of a data-channel transfer.
    /// Idempotent until [`Self::acquire_channel`] is called (§9 Open
    /// Question 2): callable any number of times from `NoDataChannel` or
    /// `ToBeUsed`, but rejected once a channel has been acquired or
    /// released.
    pub fn body_head(&self, payload: &[u8]) -> Result<()> {
        let state = *self.state.lock().unwrap();
        match state {
            ChannelState::NoDataChannel | ChannelState::ToBeUsed => {
                self.wire.write(self.index, ResponseType::BodyHead, payload)
            }
            ChannelState::Acquired | ChannelState::Released => Err(IpcError::IllegalState(
                "body_head called after the data channel was acquired".to_owned(),
            )),
        }
    }

    /// Declare intent to stream a result set before replying.
    pub fn request_channel(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            ChannelState::NoDataChannel => {
                *state = ChannelState::ToBeUsed;
                Ok(())
            }
            _ => Err(IpcError::IllegalState(
                "request_channel called more than once".to_owned(),
            )),
        }
    }

    /// Acquire a writer slot from this session's result-set arena. Fails if
    /// no channel was requested, or if a channel was already acquired or
    /// released — a response's data channel may be acquired exactly once
    /// (§9 Open Question 3: no re-acquire after release).
    pub fn acquire_channel(&self) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if *state != ChannelState::ToBeUsed {
            return Err(IpcError::AcquireFailed);
        }
        let slot = self.resultset.acquire()?;
        *state = ChannelState::Acquired;
        Ok(slot)
    }

    /// Release the acquired slot. Fails if no channel is currently acquired.
    pub fn release_channel(&self, slot: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != ChannelState::Acquired {
            return Err(IpcError::ReleaseFailed);
        }
        self.resultset.release(slot);
        *state = ChannelState::Released;
        Ok(())
    }

    /// This response's session-scoped result-set arena, for writing and
    /// committing records into the slot returned by `acquire_channel`.
    pub fn resultset(&self) -> &Arc<ResultsetArena> {
        &self.resultset
    }

    /// Attach a blob descriptor to this response, validated against the
    /// access-policy table.
    pub fn add_blob(&self, descriptor: BlobDescriptor, allow_privileged: bool) -> Result<()> {
        validate_blob(&descriptor, allow_privileged)?;
        self.blobs.lock().unwrap().push(descriptor);
        Ok(())
    }

    pub fn blobs(&self) -> Vec<BlobDescriptor> {
        self.blobs.lock().unwrap().clone()
    }

    /// Mark the underlying request cancelled; subsequent `check_cancel`
    /// calls on the matching [`crate::request::Request`] observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether `body` has already gone out. The worker's care sweep (§4.F)
    /// uses this to decide whether a registry entry can be reclaimed
    /// without synthesizing a diagnostic.
    pub fn is_completed(&self) -> bool {
        self.body_sent.load(Ordering::Acquire)
    }
}
