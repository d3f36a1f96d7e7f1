// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Listener (§4.G). Pairs a dedicated thread with the connection queue:
// on each `listen()` wakeup it allocates a session id, constructs the
// session's shared-memory segment and wires, installs a worker on its own
// thread, and records the decision in both the connection queue and the
// status memory's slot table. Grounded on `original_source`'s
// `ipc_listener.h` for the accept-loop shape and on the teacher's
// `CachedShm`/`ShmOpenMode::CreateOrOpen` exclusive-create-then-unlink
// fallback (`platform/posix.rs`) for stale-segment recovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::config::{IpcEndpointConfig, SessionConfig};
use crate::connection_queue::ConnectionQueue;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use crate::service::ServiceTable;
use crate::session::container::SessionContainer;
use crate::status_memory::StatusMemory;
use crate::worker::{AuthenticationProvider, Worker};

/// Wait granularity for the listener's accept loop.
const LISTEN_TIMEOUT_MS: u64 = 2_000;

struct LiveSession {
    worker: Arc<Worker>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the accept loop for one database endpoint. Constructed once at
/// server startup and run on its own thread; `foreach_request` lets
/// introspection services walk every in-flight request across every live
/// session without needing a reference to any individual worker.
pub struct Listener {
    database_name: String,
    endpoint_cfg: IpcEndpointConfig,
    session_cfg: SessionConfig,
    service_table: Arc<ServiceTable>,
    authenticator: Arc<dyn AuthenticationProvider>,
    queue: Arc<ConnectionQueue>,
    status: Arc<StatusMemory>,
    next_session_id: AtomicU64,
    sessions: Mutex<HashMap<u64, LiveSession>>,
}

impl Listener {
    pub fn new(
        endpoint_cfg: IpcEndpointConfig,
        session_cfg: SessionConfig,
        service_table: Arc<ServiceTable>,
        authenticator: Arc<dyn AuthenticationProvider>,
        queue: Arc<ConnectionQueue>,
        status: Arc<StatusMemory>,
    ) -> Self {
        Self {
            database_name: endpoint_cfg.database_name.clone(),
            endpoint_cfg,
            session_cfg,
            service_table,
            authenticator,
            queue,
            status,
            next_session_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Clear any session segments a previous, crashed run of this listener
    /// could have left behind (§5 "Liveness under partial failure": "on
    /// next start the listener removes stale segments by name before
    /// recreating them"). Session ids are allocated monotonically starting
    /// from 1 each run and bounded by the connection queue's total slot
    /// count, so that range fully covers what a prior run could have had
    /// live at once.
    pub fn sweep_stale_segments(&self) {
        let capacity = self.endpoint_cfg.threads + self.endpoint_cfg.admin_sessions as usize;
        for session_id in 1..=capacity as u64 {
            SessionContainer::clear_storage(
                &self.database_name,
                session_id,
                self.endpoint_cfg.max_datachannel_buffers,
            );
        }
    }

    /// Run the accept loop until the connection queue is terminated. Each
    /// accepted session gets its own worker thread; this call returns once
    /// `listen()` observes termination and every spawned worker thread has
    /// been joined.
    pub fn run(&self) -> Result<()> {
        let span = tracing::info_span!("listener", database = %self.database_name);
        let _guard = span.enter();
        loop {
            let pending = match self.queue.listen(LISTEN_TIMEOUT_MS) {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(crate::error::IpcError::Timeout) => continue,
                Err(e) => return Err(e),
            };
            self.accept_one(pending.slot, pending.is_admin);
            self.reap_finished();
        }
        self.queue.confirm_terminated().map_err(crate::error::IpcError::Platform)?;
        self.join_all();
        Ok(())
    }

    fn accept_one(&self, slot: usize, is_admin: bool) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::AcqRel);
        let container = match SessionContainer::create(&self.database_name, session_id, &self.endpoint_cfg) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(slot, session_id, error = %e, "failed to create session segment, rejecting");
                if let Err(e) = self.queue.reject(slot) {
                    warn!(slot, error = %e, "failed to publish rejection");
                }
                return;
            }
        };

        if let Err(e) = self.queue.accept(slot, session_id) {
            warn!(slot, session_id, error = %e, "failed to publish acceptance");
            return;
        }
        self.status.publish_slot(slot, session_id);
        info!(slot, session_id, is_admin, "session accepted");

        let worker = Arc::new(Worker::new(
            session_id,
            container,
            Arc::clone(&self.service_table),
            Arc::clone(&self.authenticator),
            &self.endpoint_cfg,
            self.session_cfg.clone(),
        ));

        let run_worker = Arc::clone(&worker);
        let handle = std::thread::Builder::new()
            .name(format!("ipc-session-{session_id}"))
            .spawn(move || {
                if let Err(e) = run_worker.run() {
                    warn!(session_id, error = %e, "worker exited with error");
                }
            })
            .expect("failed to spawn session worker thread");

        self.sessions.lock().unwrap().insert(
            session_id,
            LiveSession {
                worker,
                handle: Some(handle),
            },
        );
    }

    /// Join and remove any worker threads that have already exited,
    /// reclaiming their connection-queue slot and status-memory entry.
    fn reap_finished(&self) {
        let finished: Vec<u64> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.handle.as_ref().is_some_and(|h| h.is_finished()))
            .map(|(id, _)| *id)
            .collect();
        for session_id in finished {
            self.finish_session(session_id);
        }
    }

    fn finish_session(&self, session_id: u64) {
        let Some(mut session) = self.sessions.lock().unwrap().remove(&session_id) else {
            return;
        };
        if let Some(handle) = session.handle.take() {
            let _ = handle.join();
        }
        for (slot, id) in self.queue.live_sessions() {
            if id == session_id {
                let _ = self.queue.disconnect(slot);
                self.status.clear_slot(slot);
                break;
            }
        }
    }

    fn join_all(&self) {
        let ids: Vec<u64> = self.sessions.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.finish_session(id);
        }
    }

    /// Snapshot every in-flight request across every live session and apply
    /// `f` to it (§4.H: "used by the request-introspection service to list
    /// in-flight work and to fetch payloads"). Dead handles (a worker that
    /// has exited but not yet been reaped) are silently skipped.
    pub fn foreach_request<F>(&self, mut f: F)
    where
        F: FnMut(u64, u16, &Request, &Response),
    {
        let sessions = self.sessions.lock().unwrap();
        for (session_id, session) in sessions.iter() {
            session.worker.registry().foreach(|index, req, resp| {
                f(*session_id, index, req, resp);
            });
        }
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
