// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Outstanding request/response registry (§4.H). Grounded on
// `tateyama::common::wire::session_wire_container`'s bookkeeping of
// in-flight slots (original_source's `server_wires.h` comment on why a
// response object must survive until its body has gone out): the worker
// registers a `(Request, Response)` pair the moment it decodes a message
// off the request wire, and removes it the moment the response is sent,
// so a forceful shutdown can find every request still in flight and
// cancel or diagnose it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::request::Request;
use crate::response::Response;

/// One session's table of in-flight request/response pairs, keyed by the
/// request-wire message index that both wires reuse as a correlation id.
#[derive(Default)]
pub struct ReqResRegistry {
    entries: Mutex<HashMap<u16, (Arc<Request>, Arc<Response>)>>,
}

impl ReqResRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair as dispatched. Replacing an index still registered
    /// would indicate the worker reused a slot before disposing the
    /// previous response, which is a worker bug, not a normal race — the
    /// previous entry is simply dropped.
    pub fn register(&self, index: u16, request: Arc<Request>, response: Arc<Response>) {
        self.entries
            .lock()
            .unwrap()
            .insert(index, (request, response));
    }

    /// Remove the pair once its response has been fully sent.
    pub fn remove(&self, index: u16) -> Option<(Arc<Request>, Arc<Response>)> {
        self.entries.lock().unwrap().remove(&index)
    }

    pub fn get(&self, index: u16) -> Option<(Arc<Request>, Arc<Response>)> {
        self.entries.lock().unwrap().get(&index).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark every currently registered request cancelled, e.g. in
    /// response to the core routing `shutdown(GRACEFUL)` command (§6.4):
    /// services observe it on their next `check_cancel` poll.
    pub fn cancel_all(&self) {
        for (_, response) in self.entries.lock().unwrap().values() {
            response.cancel();
        }
    }

    /// Snapshot of everything still in flight, for a forceful shutdown
    /// that must reply to each with a diagnostic before tearing the
    /// session down (§6.4: `shutdown(FORCEFUL)`).
    pub fn drain(&self) -> Vec<(u16, Arc<Request>, Arc<Response>)> {
        self.entries
            .lock()
            .unwrap()
            .drain()
            .map(|(index, (req, resp))| (index, req, resp))
            .collect()
    }

    /// Snapshot of live requests for the request-introspection service
    /// (§4.H: "used by the request-introspection service to list in-flight
    /// work and to fetch payloads"). Does not remove anything.
    pub fn foreach<F>(&self, mut f: F)
    where
        F: FnMut(u16, &Request, &Response),
    {
        for (index, (req, resp)) in self.entries.lock().unwrap().iter() {
            f(*index, req, resp);
        }
    }

    /// The worker's periodic "care" sweep (§9 "Care sweep"): remove and
    /// return every entry for which `should_reclaim` holds. A response
    /// reclaimed this way either already sent its body, or its only
    /// remaining strong reference is the one the registry itself holds
    /// (the service abandoned it) — the caller distinguishes the two by
    /// `Response::is_completed`.
    pub fn reclaim<F>(&self, should_reclaim: F) -> Vec<(u16, Arc<Request>, Arc<Response>)>
    where
        F: Fn(&Request, &Response) -> bool,
    {
        let mut entries = self.entries.lock().unwrap();
        let reclaimed_keys: Vec<u16> = entries
            .iter()
            .filter(|(_, (req, resp))| should_reclaim(req, resp))
            .map(|(index, _)| *index)
            .collect();
        reclaimed_keys
            .into_iter()
            .map(|index| {
                let (req, resp) = entries.remove(&index).unwrap();
                (index, req, resp)
            })
            .collect()
    }
}
