// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error kinds and propagation, per the transport's error handling design.
// Fatal variants (`ShmAllocation`, `ConnectionQueueProtocol`) are not meant
// to be recovered from: callers that see them must tear the worker or the
// listener down rather than retry.

use std::io;

/// Result alias used throughout the transport.
pub type Result<T> = std::result::Result<T, IpcError>;

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// A ring-buffer await exceeded its deadline. Local: the caller should
    /// loop and re-check shutdown/cancel state rather than treat this as fatal.
    #[error("transport timeout")]
    Timeout,

    /// The request's framing/envelope could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// An endpoint-broker or core-routing command was not recognized.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// A blob descriptor failed the access-policy check (§4.E table).
    #[error("blob policy violation ({kind}): {path}")]
    BlobPolicyViolation { kind: BlobErrorKind, path: String },

    /// Credential verification failed during handshake.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// The request was cancelled via `check_cancel()`.
    #[error("operation canceled")]
    Cancelled,

    /// The session is shutting down or closed; no new requests are accepted.
    #[error("session closed")]
    SessionClosed,

    /// A response-object state machine transition was attempted out of order
    /// (e.g. `acquire_channel` after `release_channel`).
    #[error("channel acquire failed")]
    AcquireFailed,

    /// A channel slot was released while in the wrong state.
    #[error("channel release failed")]
    ReleaseFailed,

    /// A consumer disposed a result-set record out of order. Forbidden by
    /// design (see SPEC_FULL.md §9, Open Question 1).
    #[error("result-set record disposed out of order")]
    OutOfOrderDispose,

    /// Underlying OS primitive (shm/mmap/mutex/condvar) failed.
    #[error("platform error: {0}")]
    Platform(#[from] io::Error),

    /// Shared-memory allocation failed. **Fatal**: the session segment must
    /// be unlinked and the worker thread terminated.
    #[error("shared memory allocation failure: {0}")]
    ShmAllocation(String),

    /// The connection queue observed an out-of-sequence accept, a duplicate
    /// accept, or an accept of an already-disconnected slot. **Fatal**: abort
    /// the listener.
    #[error("connection queue protocol violation: {0}")]
    ConnectionQueueProtocol(String),

    /// A caller invoked a response/request operation out of order relative
    /// to its state machine (e.g. `body_head` after `acquire_channel`, or a
    /// second `body`).
    #[error("illegal state: {0}")]
    IllegalState(String),
}

/// Blob descriptor policy failure kinds (§4.E table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobErrorKind {
    NotAllowed,
    NotFound,
    NotAccessible,
    NotRegularFile,
}

impl std::fmt::Display for BlobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlobErrorKind::NotAllowed => "not_allowed",
            BlobErrorKind::NotFound => "not_found",
            BlobErrorKind::NotAccessible => "not_accessible",
            BlobErrorKind::NotRegularFile => "not_regular_file",
        };
        f.write_str(s)
    }
}

/// The client-visible diagnostic codes referenced throughout §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    InvalidRequest,
    OperationDenied,
    AuthenticationError,
    OperationCanceled,
    SessionClosed,
    IllegalState,
    Unknown,
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticCode::InvalidRequest => "INVALID_REQUEST",
            DiagnosticCode::OperationDenied => "OPERATION_DENIED",
            DiagnosticCode::AuthenticationError => "AUTHENTICATION_ERROR",
            DiagnosticCode::OperationCanceled => "OPERATION_CANCELED",
            DiagnosticCode::SessionClosed => "SESSION_CLOSED",
            DiagnosticCode::IllegalState => "ILLEGAL_STATE",
            DiagnosticCode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}
