// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Response wire (server -> client), §4.B. Port of
// tateyama::common::wire::unidirectional_response_wire.

use crate::error::{IpcError, Result};
use crate::wire::headers::{ResponseHeader, ResponseType, RESPONSE_HEADER_SIZE};
use crate::wire::ring::{ByteRing, DEFAULT_WAIT_MS};

pub struct ResponseWire {
    ring: ByteRing,
}

impl ResponseWire {
    /// # Safety
    /// `base` must point to `capacity` valid, exclusively-owned bytes for
    /// the lifetime of the returned `ResponseWire`.
    pub unsafe fn attach(base: *mut u8, capacity: usize, name: &str, is_creator: bool) -> Result<Self> {
        Ok(Self {
            ring: ByteRing::attach(base, capacity, name, is_creator)?,
        })
    }

    /// Server-side: write one framed response. `msg_type` distinguishes
    /// `BODY` from `BODY_HEAD` per §3.
    pub fn write(&self, index: u16, msg_type: ResponseType, payload: &[u8]) -> Result<()> {
        if payload.len() > self.ring.capacity() - RESPONSE_HEADER_SIZE {
            return Err(IpcError::ShmAllocation(format!(
                "response payload length {} exceeds response wire capacity",
                payload.len()
            )));
        }
        self.ring.reserve(RESPONSE_HEADER_SIZE, DEFAULT_WAIT_MS)?;
        self.ring.reserve_and_write(payload, DEFAULT_WAIT_MS)?;
        let header = ResponseHeader::new(index, msg_type, payload.len() as u32);
        self.ring.commit(&header.to_bytes())?;
        Ok(())
    }

    /// Client-side: wait for the next response header, blocking up to
    /// `timeout_ms`. Returns the shutdown sentinel `(0,0,0)` if the wire
    /// was closed while waiting, per §4.B.
    pub fn await_header(&self, timeout_ms: u64) -> Result<ResponseHeader> {
        if self.ring.is_closed() {
            return Ok(ResponseHeader::shutdown_sentinel());
        }
        match self.ring.wait_for_data(RESPONSE_HEADER_SIZE, timeout_ms) {
            Ok(()) => {}
            Err(IpcError::SessionClosed) => return Ok(ResponseHeader::shutdown_sentinel()),
            Err(e) => return Err(e),
        }
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        self.ring.peek_at(0, &mut buf);
        Ok(ResponseHeader::from_bytes(&buf))
    }

    /// Client-side: read and dispose the payload of the header most
    /// recently returned by `await_header`.
    pub fn read(&self, header: &ResponseHeader) -> Result<Vec<u8>> {
        let len = header.length as usize;
        let mut buf = vec![0u8; len];
        self.ring.peek_at(RESPONSE_HEADER_SIZE, &mut buf);
        self.ring.dispose(RESPONSE_HEADER_SIZE + len)?;
        Ok(buf)
    }

    /// Server-side: signal orderly shutdown; the client's next
    /// `await_header` sees the sentinel.
    pub fn close(&self) -> Result<()> {
        self.ring.close()
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }
}
