// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory IPC transport core for a database-server endpoint: a
// multiplexed request/response wire plus out-of-band result-set wires
// between a client and server process on the same host. Session admission
// goes through a slot-based connection queue with normal and privileged
// quotas; each accepted session gets a dedicated worker thread running the
// handshake/main-loop/shutdown state machine over its own shared-memory
// segment. Not a general message-passing library: the wire formats, the
// broker/routing command sets, and the blob-access policy are all fixed by
// the endpoint protocol this crate implements.
//
// Cross-host networking, in-process plugin loading, hot-reconfiguration,
// and crash durability of in-flight messages are out of scope.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod semaphore;
pub use semaphore::IpcSemaphore;

mod waiter;
pub use waiter::Waiter;

mod spin_lock;
pub use spin_lock::SpinLock;

mod scoped_access;
pub use scoped_access::ScopedAccess;

pub mod error;
pub use error::{IpcError, Result};

pub mod config;
pub use config::{AuthenticationConfig, IpcConfig, IpcEndpointConfig, SessionConfig};

pub mod wire;
pub use wire::{ByteRing, RequestWire, ResponseWire, ResultsetArena};

pub mod session;
pub use session::{ReqResRegistry, SessionContainer, SessionStore};

pub mod connection_queue;
pub use connection_queue::{ConnectResult, ConnectionQueue, PendingDecision};

pub mod request;
pub use request::{BlobDescriptor, Request};

pub mod response;
pub use response::Response;

pub mod service;
pub use service::{Service, ServiceTable};

pub mod worker;
pub use worker::{AuthenticationProvider, NullAuthenticationProvider, Worker};

pub mod listener;
pub use listener::Listener;

pub mod status_memory;
pub use status_memory::{Lifecycle, StatusMemory};

pub mod protocol;
