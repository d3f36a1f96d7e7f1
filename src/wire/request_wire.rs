// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request wire (client -> server), §4.B. Port of
// tateyama::common::wire::unidirectional_message_wire.

use crate::error::{IpcError, Result};
use crate::wire::headers::{MessageHeader, MESSAGE_HEADER_SIZE};
use crate::wire::ring::{ByteRing, DEFAULT_WAIT_MS};

pub struct RequestWire {
    ring: ByteRing,
}

impl RequestWire {
    /// # Safety
    /// `base` must point to `capacity` valid, exclusively-owned bytes for
    /// the lifetime of the returned `RequestWire`.
    pub unsafe fn attach(base: *mut u8, capacity: usize, name: &str, is_creator: bool) -> Result<Self> {
        Ok(Self {
            ring: ByteRing::attach(base, capacity, name, is_creator)?,
        })
    }

    /// Client-side: push one whole framed message `{header, payload}`.
    pub fn write(&self, index: u16, payload: &[u8]) -> Result<()> {
        if payload.len() > self.ring.capacity() - MESSAGE_HEADER_SIZE {
            return Err(IpcError::MalformedRequest(format!(
                "payload length {} exceeds request wire capacity",
                payload.len()
            )));
        }
        self.ring.reserve(MESSAGE_HEADER_SIZE, DEFAULT_WAIT_MS)?;
        self.ring
            .reserve_and_write(payload, DEFAULT_WAIT_MS)?;
        let header = MessageHeader::new(index, payload.len() as u16);
        self.ring.commit(&header.to_bytes())?;
        Ok(())
    }

    /// Client-side: signal "end this session".
    pub fn write_terminate(&self) -> Result<()> {
        self.ring.reserve(MESSAGE_HEADER_SIZE, DEFAULT_WAIT_MS)?;
        self.ring.commit(&MessageHeader::terminate().to_bytes())
    }

    /// Server-side: peek the header of the next message, blocking up to
    /// `timeout_ms`. Does not consume the message.
    pub fn peek(&self, timeout_ms: u64) -> Result<MessageHeader> {
        self.ring.wait_for_data(MESSAGE_HEADER_SIZE, timeout_ms)?;
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        self.ring.peek_at(0, &mut buf);
        Ok(MessageHeader::from_bytes(&buf))
    }

    /// Server-side: borrow-free read of the payload bytes of the peeked
    /// message (wrap-around reassembly happens transparently).
    pub fn payload(&self, header: &MessageHeader) -> Vec<u8> {
        let mut buf = vec![0u8; header.length as usize];
        self.ring.peek_at(MESSAGE_HEADER_SIZE, &mut buf);
        buf
    }

    /// Server-side: dispose of the message once fully processed, if it is
    /// still at the read point (matches `unidirectional_message_wire::dispose`;
    /// out-of-order dispose of an already-advanced read point is a no-op,
    /// mirroring the upstream FIXME resolved toward "ignore, don't corrupt").
    pub fn dispose(&self, read_point: usize, header: &MessageHeader) -> Result<()> {
        if self.ring.read_point() == read_point {
            self.ring
                .dispose(MESSAGE_HEADER_SIZE + header.length as usize)?;
        }
        Ok(())
    }

    pub fn read_point(&self) -> usize {
        self.ring.read_point()
    }

    pub fn close(&self) -> Result<()> {
        self.ring.close()
    }
}
