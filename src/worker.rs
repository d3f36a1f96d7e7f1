// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-session worker state machine (§4.F). Grounded on
// `original_source/src/tateyama/endpoint/ipc/ipc_worker.h` (`worker_common.h`
// for the handshake/main-loop/shutdown phase names) with the reqres "care"
// sweep modeled per §9's back-pointer note: the registry is the
// authoritative strong owner, and a response whose only remaining strong
// reference is the registry's own is treated as abandoned.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::{IpcEndpointConfig, SessionConfig};
use crate::error::{DiagnosticCode, IpcError, Result};
use crate::protocol::broker::{BrokerCommand, BROKER_SERVICE_ID, ROUTING_SERVICE_ID};
use crate::protocol::envelope::{
    decode_request_payload, encode_response_payload, Diagnostic, FrameworkResponseHeader,
    PayloadType,
};
use crate::protocol::routing::{RoutingCommand, ShutdownKind, UpdateExpirationTime};
use crate::request::Request;
use crate::response::Response;
use crate::service::ServiceTable;
use crate::session::container::SessionContainer;
use crate::session::registry::ReqResRegistry;
use crate::session::store::SessionStore;
use crate::wire::{MessageHeader, ResponseType};

/// Wait granularity for the request-wire peek: long enough to avoid
/// busy-looping, short enough that shutdown/expiration checks stay timely
/// (§5: "a timeout is converted into a loop iteration for the worker").
const POLL_TIMEOUT_MS: u64 = 2_000;

/// Authentication is an external collaborator (§1 Non-goals list
/// "authentication token crypto details" out of scope); the worker only
/// needs *an* implementation to call during handshake.
pub trait AuthenticationProvider: Send + Sync {
    /// The public key to hand back on an `encryption_key` broker command,
    /// or `None` if authentication is disabled.
    fn public_key(&self) -> Option<Vec<u8>>;

    /// Verify a handshake credential, returning the authenticated user's
    /// name on success.
    fn verify_credential(&self, credential: &[u8]) -> Result<String>;
}

/// Accepts every credential as an anonymous user; used when
/// `authentication.enabled = false`.
pub struct NullAuthenticationProvider;

impl AuthenticationProvider for NullAuthenticationProvider {
    fn public_key(&self) -> Option<Vec<u8>> {
        None
    }

    fn verify_credential(&self, _credential: &[u8]) -> Result<String> {
        Ok("anonymous".to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    Running,
    Draining,
    Done,
}

/// One session's worker thread body (§4.F). Constructed by the listener
/// once a session is accepted; `run` is called on the dedicated thread.
pub struct Worker {
    session_id: u64,
    container: Arc<SessionContainer>,
    service_table: Arc<ServiceTable>,
    authenticator: Arc<dyn AuthenticationProvider>,
    allow_blob_privileged: bool,
    session_cfg: SessionConfig,
    registry: ReqResRegistry,
    pub store: SessionStore,
    phase: Mutex<Phase>,
    shutdown_kind: Mutex<ShutdownKind>,
    expires_at: Mutex<Instant>,
    authenticated_user: Mutex<Option<String>>,
}

impl Worker {
    pub fn new(
        session_id: u64,
        container: Arc<SessionContainer>,
        service_table: Arc<ServiceTable>,
        authenticator: Arc<dyn AuthenticationProvider>,
        endpoint_cfg: &IpcEndpointConfig,
        session_cfg: SessionConfig,
    ) -> Self {
        Self {
            session_id,
            container,
            service_table,
            authenticator,
            allow_blob_privileged: endpoint_cfg.allow_blob_privileged,
            session_cfg: session_cfg.clone(),
            registry: ReqResRegistry::new(),
            store: SessionStore::new(),
            phase: Mutex::new(Phase::Handshake),
            shutdown_kind: Mutex::new(ShutdownKind::NotSet),
            expires_at: Mutex::new(Instant::now() + Duration::from_millis(session_cfg.refresh_timeout_ms)),
            authenticated_user: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The in-flight request/response table, for the listener's
    /// `foreach_request` introspection (§4.G/§4.H).
    pub fn registry(&self) -> &ReqResRegistry {
        &self.registry
    }

    /// Run the worker to completion: handshake, main loop, shutdown. The
    /// caller (the listener, typically on a dedicated thread) is
    /// responsible for tearing down the session segment once this
    /// returns, successfully or not.
    pub fn run(&self) -> Result<()> {
        let span = tracing::info_span!("worker", session_id = self.session_id);
        let _guard = span.enter();
        self.handshake()?;
        self.main_loop()?;
        debug!(session_id = self.session_id, "worker exiting");
        Ok(())
    }

    fn refresh_expiration(&self) {
        if !self.session_cfg.enable_timeout {
            return;
        }
        let extension = Duration::from_millis(self.session_cfg.refresh_timeout_ms);
        *self.expires_at.lock().unwrap() = Instant::now() + extension;
    }

    fn is_expired(&self) -> bool {
        self.session_cfg.enable_timeout && Instant::now() >= *self.expires_at.lock().unwrap()
    }

    /// `update_expiration_time` (§6.4): with a value, extend by `ms`
    /// capped at `max_refresh_timeout_ms`; without one, refresh to the
    /// default.
    fn update_expiration(&self, value: UpdateExpirationTime) {
        if !self.session_cfg.enable_timeout {
            return;
        }
        let ms = match value {
            UpdateExpirationTime::None => self.session_cfg.refresh_timeout_ms,
            UpdateExpirationTime::Some(ms) => ms.min(self.session_cfg.max_refresh_timeout_ms),
        };
        *self.expires_at.lock().unwrap() = Instant::now() + Duration::from_millis(ms);
    }

    fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap() = phase;
    }

    // -- Handshake (§4.F "Handshake") ---------------------------------

    fn handshake(&self) -> Result<()> {
        loop {
            let header = match self.container.request_wire().peek(POLL_TIMEOUT_MS) {
                Ok(h) => h,
                Err(IpcError::Timeout) => continue,
                Err(e) => return Err(e),
            };
            if header.is_terminate() {
                return Err(IpcError::IllegalState(
                    "client disconnected during handshake".to_owned(),
                ));
            }
            let payload = self.take_message(&header);
            let (fh, body) = decode_request_payload(&payload)?;
            if fh.service_id != BROKER_SERVICE_ID {
                self.reply_diagnostic(
                    header.index,
                    DiagnosticCode::IllegalState,
                    "handshake required before any other command",
                )?;
                return Err(IpcError::IllegalState(
                    "first request was not addressed to the endpoint broker".to_owned(),
                ));
            }
            let command = BrokerCommand::decode(&body)?;
            match command {
                BrokerCommand::EncryptionKey => {
                    match self.authenticator.public_key() {
                        Some(key) => self.reply_service_result(header.index, &key)?,
                        None => self.reply_diagnostic(
                            header.index,
                            DiagnosticCode::AuthenticationError,
                            "authentication is disabled",
                        )?,
                    }
                    // stay in handshake
                }
                BrokerCommand::Handshake { credential, .. } => {
                    if let Some(credential) = credential {
                        match self.authenticator.verify_credential(&credential) {
                            Ok(user) => *self.authenticated_user.lock().unwrap() = Some(user),
                            Err(_) => {
                                self.reply_diagnostic(
                                    header.index,
                                    DiagnosticCode::AuthenticationError,
                                    "credential verification failed",
                                )?;
                                return Err(IpcError::AuthenticationFailure);
                            }
                        }
                    }
                    self.reply_service_result(header.index, &self.session_id.to_be_bytes())?;
                    self.set_phase(Phase::Running);
                    return Ok(());
                }
                BrokerCommand::Cancel { .. } => {
                    self.reply_diagnostic(
                        header.index,
                        DiagnosticCode::IllegalState,
                        "handshake required before any other command",
                    )?;
                }
            }
        }
    }

    /// Administrator identity recorded at handshake time, preserved for
    /// the lifetime of the session (§8 invariant 7).
    pub fn authenticated_user(&self) -> Option<String> {
        self.authenticated_user.lock().unwrap().clone()
    }

    // -- Main loop (§4.F "Main loop") ----------------------------------

    fn main_loop(&self) -> Result<()> {
        loop {
            let header = match self.container.request_wire().peek(POLL_TIMEOUT_MS) {
                Ok(h) => h,
                Err(IpcError::Timeout) => {
                    self.on_tick();
                    if self.should_exit() {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if header.is_terminate() {
                self.begin_shutdown(ShutdownKind::Forceful);
                self.dispose_message(&header);
                break;
            }

            let payload = self.take_message(&header);
            if let Err(e) = self.handle_message(header.index, &payload) {
                warn!(error = %e, "request handling failed");
            }
            self.refresh_expiration();
            self.care_reqres();

            if self.is_expired() && self.phase() == Phase::Running {
                self.begin_shutdown(ShutdownKind::Graceful);
            }
            if self.should_exit() {
                break;
            }
        }
        self.drain_to_completion();
        self.container.response_wire().close()?;
        self.store.close();
        Ok(())
    }

    fn should_exit(&self) -> bool {
        self.phase() == Phase::Draining && self.registry.is_empty()
    }

    fn on_tick(&self) {
        if self.is_expired() && self.phase() == Phase::Running {
            self.begin_shutdown(ShutdownKind::Graceful);
        }
    }

    fn take_message(&self, header: &MessageHeader) -> Vec<u8> {
        let payload = self.container.request_wire().payload(header);
        self.dispose_message(header);
        payload
    }

    fn dispose_message(&self, header: &MessageHeader) {
        let read_point = self.container.request_wire().read_point();
        let _ = self.container.request_wire().dispose(read_point, header);
    }

    fn handle_message(&self, index: u16, payload: &[u8]) -> Result<()> {
        let (fh, body) = decode_request_payload(payload)?;

        if fh.service_id == BROKER_SERVICE_ID {
            return self.handle_broker_command(index, &body);
        }
        if fh.service_id == ROUTING_SERVICE_ID {
            return self.handle_routing_command(index, &body);
        }
        if self.phase() == Phase::Draining {
            return self.reply_diagnostic(
                index,
                DiagnosticCode::SessionClosed,
                "session is shutting down",
            );
        }

        let request = Arc::new(Request::new(
            fh.session_id,
            fh.service_id,
            index,
            body,
            fh.blobs,
            self.allow_blob_privileged,
        ));
        let response = Arc::new(Response::new(
            index,
            Arc::clone(self.container.response_wire()),
            Arc::clone(self.container.resultset()),
            request.cancel_token(),
        ));
        self.registry
            .register(index, Arc::clone(&request), Arc::clone(&response));

        if let Some((kind, path)) = request.blob_error() {
            self.reply_diagnostic(
                index,
                DiagnosticCode::OperationDenied,
                &format!("blob policy violation ({kind}): {path}"),
            )?;
            self.registry.remove(index);
            return Ok(());
        }

        if let Err(e) = self.service_table.dispatch(&request, &response) {
            if !response.is_completed() {
                self.reply_diagnostic_on(&response, diagnostic_code_for(&e), &e.to_string())?;
            }
        }
        Ok(())
    }

    fn handle_broker_command(&self, index: u16, body: &[u8]) -> Result<()> {
        let command = BrokerCommand::decode(body)?;
        match command {
            BrokerCommand::Cancel { slot } => {
                if let Some((_, response)) = self.registry.get(slot) {
                    response.cancel();
                }
                self.reply_service_result(index, &[])
            }
            BrokerCommand::EncryptionKey => self.reply_diagnostic(
                index,
                DiagnosticCode::IllegalState,
                "encryption_key is only valid during handshake",
            ),
            BrokerCommand::Handshake { .. } => self.reply_diagnostic(
                index,
                DiagnosticCode::IllegalState,
                "session already established",
            ),
        }
    }

    fn handle_routing_command(&self, index: u16, body: &[u8]) -> Result<()> {
        let command = RoutingCommand::decode(body)?;
        match command {
            RoutingCommand::Shutdown(kind) => {
                self.begin_shutdown(kind);
                self.reply_service_result(index, &[])
            }
            RoutingCommand::UpdateExpirationTime(value) => {
                self.update_expiration(value);
                self.reply_service_result(index, &[])
            }
        }
    }

    fn begin_shutdown(&self, kind: ShutdownKind) {
        let mut current = self.shutdown_kind.lock().unwrap();
        if matches!(*current, ShutdownKind::Forceful) {
            return;
        }
        *current = kind;
        drop(current);
        self.set_phase(Phase::Draining);
        if kind == ShutdownKind::Forceful {
            self.registry.cancel_all();
        }
    }

    /// The worker's "care" sweep (§4.F point 3, §9 "Care sweep"): drop the
    /// registry's own strong reference to every response that has already
    /// sent its body, so the registry stops growing under sustained
    /// traffic. Responses a service abandoned without replying are left in
    /// place; only [`Self::drain_to_completion`] (run once, at shutdown)
    /// finalizes those with a synthesized diagnostic.
    fn care_reqres(&self) {
        self.registry.reclaim(|_, response| response.is_completed());
    }

    fn drain_to_completion(&self) {
        let deadline = Instant::now() + Duration::from_millis(POLL_TIMEOUT_MS * 5);
        while !self.registry.is_empty() && Instant::now() < deadline {
            self.care_reqres();
            std::thread::sleep(Duration::from_millis(50));
        }
        for (index, _, response) in self.registry.drain() {
            if !response.is_completed() {
                let diag = Diagnostic::new(DiagnosticCode::Unknown, "request dissipated");
                let header = FrameworkResponseHeader {
                    session_id: self.session_id,
                    payload_type: PayloadType::ServerDiagnostics,
                    blobs: Vec::new(),
                };
                let payload = encode_response_payload(&header, &diag.encode());
                let _ = self
                    .container
                    .response_wire()
                    .write(index, ResponseType::Body, &payload);
            }
        }
    }

    fn reply_service_result(&self, index: u16, body: &[u8]) -> Result<()> {
        let header = FrameworkResponseHeader {
            session_id: self.session_id,
            payload_type: PayloadType::ServiceResult,
            blobs: Vec::new(),
        };
        let payload = encode_response_payload(&header, body);
        self.container
            .response_wire()
            .write(index, ResponseType::Body, &payload)
    }

    fn reply_diagnostic(&self, index: u16, code: DiagnosticCode, message: &str) -> Result<()> {
        let diag = Diagnostic::new(code, message);
        let header = FrameworkResponseHeader {
            session_id: self.session_id,
            payload_type: PayloadType::ServerDiagnostics,
            blobs: Vec::new(),
        };
        let payload = encode_response_payload(&header, &diag.encode());
        self.container
            .response_wire()
            .write(index, ResponseType::Body, &payload)
    }

    fn reply_diagnostic_on(&self, response: &Response, code: DiagnosticCode, message: &str) -> Result<()> {
        let diag = Diagnostic::new(code, message);
        let header = FrameworkResponseHeader {
            session_id: self.session_id,
            payload_type: PayloadType::ServerDiagnostics,
            blobs: Vec::new(),
        };
        let payload = encode_response_payload(&header, &diag.encode());
        response.body(&payload)
    }
}

fn diagnostic_code_for(error: &IpcError) -> DiagnosticCode {
    match error {
        IpcError::MalformedRequest(_) | IpcError::UnsupportedCommand(_) => {
            DiagnosticCode::InvalidRequest
        }
        IpcError::BlobPolicyViolation { .. } => DiagnosticCode::OperationDenied,
        IpcError::AuthenticationFailure => DiagnosticCode::AuthenticationError,
        IpcError::Cancelled => DiagnosticCode::OperationCanceled,
        IpcError::SessionClosed => DiagnosticCode::SessionClosed,
        IpcError::IllegalState(_) | IpcError::AcquireFailed | IpcError::ReleaseFailed => {
            DiagnosticCode::IllegalState
        }
        _ => {
            error!(%error, "unclassified error during dispatch");
            DiagnosticCode::Unknown
        }
    }
}
