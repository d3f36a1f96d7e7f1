// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-session wire container (§4.C). Grounded on
// `tateyama::common::wire::server_wire_container` (original_source's
// `server_wires.h`): a single shared-memory segment holding one request
// wire, one response wire, and a fixed-size arena of result-set writer
// rings, all carved out of one `ShmHandle` allocation so that attach/detach
// and segment teardown stay atomic from the kernel's point of view.

use std::sync::Arc;

use crate::config::IpcEndpointConfig;
use crate::error::Result;
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::wire::{RequestWire, ResponseWire, ResultsetArena};

/// Layout offsets within the session segment. Request wire first (client
/// writes immediately after connect), then response wire, then the
/// result-set arena's slot buffers back to back.
struct Layout {
    request_offset: usize,
    request_len: usize,
    response_offset: usize,
    response_len: usize,
    resultset_offset: usize,
    resultset_slot_len: usize,
    resultset_slots: usize,
    total: usize,
}

impl Layout {
    fn new(cfg: &IpcEndpointConfig) -> Self {
        let request_len = cfg.request_buffer_size;
        let response_len = cfg.response_buffer_size;
        let resultset_slot_len = cfg.datachannel_buffer_size;
        let resultset_slots = cfg.max_datachannel_buffers;
        let request_offset = 0;
        let response_offset = request_offset + request_len;
        let resultset_offset = response_offset + response_len;
        let total = resultset_offset + resultset_slot_len * resultset_slots;
        Self {
            request_offset,
            request_len,
            response_offset,
            response_len,
            resultset_offset,
            resultset_slot_len,
            resultset_slots,
            total,
        }
    }
}

/// Owns the shared-memory segment backing one client session's wires.
/// Unlinks the segment from the kernel namespace on drop — a session's
/// shared memory never outlives the container that created it.
pub struct SessionContainer {
    shm: ShmHandle,
    name: String,
    is_creator: bool,
    request_wire: RequestWire,
    response_wire: Arc<ResponseWire>,
    resultset: Arc<ResultsetArena>,
}

impl SessionContainer {
    /// Listener-side: create the segment for a newly accepted session.
    pub fn create(database_name: &str, session_id: u64, cfg: &IpcEndpointConfig) -> Result<Self> {
        let name = segment_name(database_name, session_id);
        let layout = Layout::new(cfg);
        let shm = ShmHandle::acquire(&name, layout.total, ShmOpenMode::Create)
            .map_err(crate::error::IpcError::Platform)?;
        // Safety: `shm` owns `layout.total` exclusive bytes for its lifetime;
        // the three wires partition that range disjointly and never outlive `shm`.
        unsafe { Self::attach_wires(shm, name, &layout, true) }
    }

    /// Client-side: attach to a segment the listener already created.
    pub fn open(database_name: &str, session_id: u64, cfg: &IpcEndpointConfig) -> Result<Self> {
        let name = segment_name(database_name, session_id);
        let layout = Layout::new(cfg);
        let shm = ShmHandle::acquire(&name, layout.total, ShmOpenMode::Open)
            .map_err(crate::error::IpcError::Platform)?;
        unsafe { Self::attach_wires(shm, name, &layout, false) }
    }

    unsafe fn attach_wires(
        shm: ShmHandle,
        name: String,
        layout: &Layout,
        is_creator: bool,
    ) -> Result<Self> {
        let base = shm.as_mut_ptr();
        let request_wire = RequestWire::attach(
            base.add(layout.request_offset),
            layout.request_len,
            &format!("{name}_REQ"),
            is_creator,
        )?;
        let response_wire = ResponseWire::attach(
            base.add(layout.response_offset),
            layout.response_len,
            &format!("{name}_RES"),
            is_creator,
        )?;
        let slot_buffers = (0..layout.resultset_slots)
            .map(|i| {
                (
                    base.add(layout.resultset_offset + i * layout.resultset_slot_len),
                    layout.resultset_slot_len,
                )
            })
            .collect();
        let resultset = ResultsetArena::attach(&format!("{name}_RS"), slot_buffers, is_creator)?;
        Ok(Self {
            shm,
            name,
            is_creator,
            request_wire,
            response_wire: Arc::new(response_wire),
            resultset: Arc::new(resultset),
        })
    }

    pub fn request_wire(&self) -> &RequestWire {
        &self.request_wire
    }

    pub fn response_wire(&self) -> &Arc<ResponseWire> {
        &self.response_wire
    }

    pub fn resultset(&self) -> &Arc<ResultsetArena> {
        &self.resultset
    }

    /// Segment name, published so the client side can `open` the same
    /// segment without re-deriving the session id encoding.
    pub fn segment_name(&self) -> &str {
        &self.name
    }

    /// Remove every named primitive a session segment for `session_id`
    /// could have left behind, without needing a live handle. Used by the
    /// listener's startup sweep (§5 "Liveness under partial failure") to
    /// clear segments orphaned by a server process that crashed without
    /// running its workers to completion.
    pub fn clear_storage(database_name: &str, session_id: u64, max_datachannel_buffers: usize) {
        let name = segment_name(database_name, session_id);
        let req = format!("{name}_REQ");
        let res = format!("{name}_RES");
        let rs = format!("{name}_RS");
        crate::waiter::Waiter::clear_storage(&format!("{req}_DATA"));
        crate::waiter::Waiter::clear_storage(&format!("{req}_ROOM"));
        crate::waiter::Waiter::clear_storage(&format!("{res}_DATA"));
        crate::waiter::Waiter::clear_storage(&format!("{res}_ROOM"));
        crate::waiter::Waiter::clear_storage(&format!("{rs}_RECORD"));
        for i in 0..max_datachannel_buffers {
            let slot = format!("{rs}_SLOT{i}");
            crate::waiter::Waiter::clear_storage(&format!("{slot}_DATA"));
            crate::waiter::Waiter::clear_storage(&format!("{slot}_ROOM"));
        }
        ShmHandle::clear_storage(&name);
    }
}

impl Drop for SessionContainer {
    fn drop(&mut self) {
        // Only the server side (the listener, which created the segment) may
        // unlink it (§9 "Shared-memory ownership across processes": the
        // client "has read/write access but never deallocates").
        if self.is_creator {
            self.shm.unlink();
        }
    }
}

fn segment_name(database_name: &str, session_id: u64) -> String {
    format!("tateyama-{database_name}-session-{session_id:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_does_not_overlap() {
        let cfg = IpcEndpointConfig {
            request_buffer_size: 100,
            response_buffer_size: 200,
            datachannel_buffer_size: 50,
            max_datachannel_buffers: 3,
            ..IpcEndpointConfig::default()
        };
        let layout = Layout::new(&cfg);
        assert_eq!(layout.request_offset, 0);
        assert_eq!(layout.response_offset, 100);
        assert_eq!(layout.resultset_offset, 300);
        assert_eq!(layout.total, 300 + 50 * 3);
    }

    #[test]
    #[cfg(unix)]
    fn only_the_creator_unlinks_the_segment_on_drop() {
        // §9 "Shared-memory ownership across processes": the client attaches
        // but never deallocates. Dropping the client-side container must
        // leave the segment intact for the server; only dropping the
        // server-side (creator) container removes it.
        let cfg = IpcEndpointConfig {
            request_buffer_size: 64,
            response_buffer_size: 64,
            datachannel_buffer_size: 32,
            max_datachannel_buffers: 1,
            ..IpcEndpointConfig::default()
        };
        let db = "wtest-drop-ownership";
        let session_id = 0xabcdu64;

        let server = SessionContainer::create(db, session_id, &cfg).unwrap();
        let client = SessionContainer::open(db, session_id, &cfg).unwrap();
        let name = client.segment_name().to_owned();

        drop(client);
        assert!(
            crate::shm::ShmHandle::acquire(&name, 1, crate::shm::ShmOpenMode::Open).is_ok(),
            "client drop must not unlink the session segment"
        );

        drop(server);
        assert!(
            crate::shm::ShmHandle::acquire(&name, 1, crate::shm::ShmOpenMode::Open).is_err(),
            "server (creator) drop must unlink the session segment"
        );
    }
}
