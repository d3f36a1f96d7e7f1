// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Service dispatch (§2 SUPPLEMENT: the worker needs something to hand a
// decoded request's service body to). Grounded on
// `tateyama::framework::service` (original_source) for the
// `operator()(request, response) -> bool` shape; the routing table itself
// mirrors `tateyama::framework::routing_service_chain`'s service-id keyed
// lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{IpcError, Result};
use crate::request::Request;
use crate::response::Response;

/// One application-level handler, keyed by `service_id` in the framework
/// header (§6.2). Implementors do their own `request.check_cancel()`
/// polling during long-running work and reply via `response.body`/
/// `response.request_channel`/`response.acquire_channel`.
pub trait Service: Send + Sync {
    fn call(&self, request: &Request, response: &Response) -> Result<()>;
}

/// Maps `service_id` to the service handling it. Shared across every
/// worker in the process; registration happens once at startup.
#[derive(Default)]
pub struct ServiceTable {
    services: RwLock<HashMap<u64, Arc<dyn Service>>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service_id: u64, service: Arc<dyn Service>) {
        self.services.write().unwrap().insert(service_id, service);
    }

    /// Dispatch a decoded request to the service named by its
    /// `service_id`. Unknown service ids are the caller's responsibility
    /// to diagnose (§6.3/§6.4 reserve low ids for the broker and routing
    /// commands, which the worker handles before reaching here).
    pub fn dispatch(&self, request: &Request, response: &Response) -> Result<()> {
        let service = self
            .services
            .read()
            .unwrap()
            .get(&request.service_id())
            .cloned()
            .ok_or_else(|| {
                IpcError::UnsupportedCommand(format!(
                    "no service registered for service_id {}",
                    request.service_id()
                ))
            })?;
        service.call(request, response)
    }
}
