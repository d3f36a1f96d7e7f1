// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Drives a real Worker through handshake -> service dispatch -> graceful
// shutdown over an actual shared-memory session segment, playing the part
// of the client by hand with the same wire primitives a client library
// would use (§4.F, §6.2, §6.3, §6.4).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tateyama_ipc::protocol::broker::{BrokerCommand, BROKER_SERVICE_ID, ROUTING_SERVICE_ID};
use tateyama_ipc::protocol::envelope::{
    decode_response_payload, encode_request_payload, FrameworkHeader, PayloadType,
};
use tateyama_ipc::protocol::routing::{RoutingCommand, ShutdownKind};
use tateyama_ipc::{
    IpcEndpointConfig, NullAuthenticationProvider, Request, Response, Result as IpcResult,
    Service, ServiceTable, SessionConfig, SessionContainer, Worker,
};

struct Echo;
impl Service for Echo {
    fn call(&self, request: &Request, response: &Response) -> IpcResult<()> {
        response.body(request.payload())
    }
}

fn test_config(database_name: &str) -> IpcEndpointConfig {
    IpcEndpointConfig {
        database_name: database_name.to_owned(),
        threads: 4,
        admin_sessions: 1,
        datachannel_buffer_size: 256,
        max_datachannel_buffers: 2,
        allow_blob_privileged: false,
        request_buffer_size: 1024,
        response_buffer_size: 1024,
    }
}

fn no_timeout_session_cfg() -> SessionConfig {
    SessionConfig {
        enable_timeout: false,
        ..SessionConfig::default()
    }
}

const ECHO_SERVICE_ID: u64 = 42;

#[test]
fn handshake_then_echo_then_graceful_shutdown() {
    let cfg = test_config("wtest-lifecycle");
    let session_id = 1u64;

    let server_container = Arc::new(SessionContainer::create("wtest-lifecycle", session_id, &cfg).unwrap());
    let client_container = SessionContainer::open("wtest-lifecycle", session_id, &cfg).unwrap();

    let service_table = Arc::new(ServiceTable::new());
    service_table.register(ECHO_SERVICE_ID, Arc::new(Echo));

    let worker = Arc::new(Worker::new(
        session_id,
        Arc::clone(&server_container),
        service_table,
        Arc::new(NullAuthenticationProvider),
        &cfg,
        no_timeout_session_cfg(),
    ));

    let run_worker = Arc::clone(&worker);
    let worker_thread = thread::spawn(move || run_worker.run().unwrap());

    // -- Handshake --------------------------------------------------
    let handshake_header = FrameworkHeader {
        session_id: 0,
        service_id: BROKER_SERVICE_ID,
        blobs: vec![],
    };
    let handshake_command = BrokerCommand::Handshake {
        connection_label: "test-conn".into(),
        application_name: "test-client".into(),
        credential: None,
    };
    let payload = encode_request_payload(&handshake_header, &handshake_command.encode());
    client_container.request_wire().write(1, &payload).unwrap();

    let header = client_container.response_wire().await_header(5000).unwrap();
    assert!(!header.is_shutdown_sentinel());
    let body = client_container.response_wire().read(&header).unwrap();
    let (fh, service_result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServiceResult);
    assert_eq!(service_result, session_id.to_be_bytes());

    // -- Echo service dispatch ---------------------------------------
    let echo_header = FrameworkHeader {
        session_id,
        service_id: ECHO_SERVICE_ID,
        blobs: vec![],
    };
    let echo_payload = encode_request_payload(&echo_header, b"ping");
    client_container.request_wire().write(2, &echo_payload).unwrap();

    let header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&header).unwrap();
    let (fh, result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServiceResult);
    assert_eq!(result, b"ping");

    // -- Graceful shutdown --------------------------------------------
    let shutdown_header = FrameworkHeader {
        session_id,
        service_id: ROUTING_SERVICE_ID,
        blobs: vec![],
    };
    let shutdown_command = RoutingCommand::Shutdown(ShutdownKind::Graceful);
    let shutdown_payload = encode_request_payload(&shutdown_header, &shutdown_command.encode());
    client_container.request_wire().write(3, &shutdown_payload).unwrap();

    let header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&header).unwrap();
    let (fh, result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServiceResult);
    assert!(result.is_empty());

    // With no in-flight requests left, the worker exits the main loop on
    // its own and closes the response wire; the client's next await sees
    // the shutdown sentinel.
    let header = client_container.response_wire().await_header(5000).unwrap();
    assert!(header.is_shutdown_sentinel());

    worker_thread.join().unwrap();
}

#[test]
fn cancel_command_for_a_slot_with_no_live_response_is_a_safe_noop() {
    // The worker processes one request-wire message at a time (§4.F "Main
    // loop"), so a cancel naming the slot of a request already completed —
    // or never issued — finds nothing in the registry. `handle_broker_command`
    // treats that as ordinary, not an error (§6.3: only a registered response
    // is looked up and cancelled; there's nothing else to validate).
    let cfg = test_config("wtest-cancel");
    let session_id = 2u64;

    let server_container = Arc::new(SessionContainer::create("wtest-cancel", session_id, &cfg).unwrap());
    let client_container = SessionContainer::open("wtest-cancel", session_id, &cfg).unwrap();

    let service_table = Arc::new(ServiceTable::new());
    service_table.register(ECHO_SERVICE_ID, Arc::new(Echo));

    let worker = Arc::new(Worker::new(
        session_id,
        Arc::clone(&server_container),
        service_table,
        Arc::new(NullAuthenticationProvider),
        &cfg,
        no_timeout_session_cfg(),
    ));

    let run_worker = Arc::clone(&worker);
    let worker_thread = thread::spawn(move || run_worker.run().unwrap());

    let handshake_header = FrameworkHeader {
        session_id: 0,
        service_id: BROKER_SERVICE_ID,
        blobs: vec![],
    };
    let handshake_command = BrokerCommand::Handshake {
        connection_label: "test-conn".into(),
        application_name: "test-client".into(),
        credential: None,
    };
    let payload = encode_request_payload(&handshake_header, &handshake_command.encode());
    client_container.request_wire().write(1, &payload).unwrap();
    let header = client_container.response_wire().await_header(5000).unwrap();
    let _ = client_container.response_wire().read(&header).unwrap();

    let cancel_header = FrameworkHeader {
        session_id,
        service_id: BROKER_SERVICE_ID,
        blobs: vec![],
    };
    let cancel_command = BrokerCommand::Cancel { slot: 999 };
    let cancel_payload = encode_request_payload(&cancel_header, &cancel_command.encode());
    client_container.request_wire().write(2, &cancel_payload).unwrap();

    let header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&header).unwrap();
    let (fh, cancel_result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServiceResult);
    assert!(cancel_result.is_empty());

    // The session still works normally afterwards.
    let echo_header = FrameworkHeader {
        session_id,
        service_id: ECHO_SERVICE_ID,
        blobs: vec![],
    };
    let echo_payload = encode_request_payload(&echo_header, b"still alive");
    client_container.request_wire().write(3, &echo_payload).unwrap();
    let header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&header).unwrap();
    let (_, result) = decode_response_payload(&body).unwrap();
    assert_eq!(result, b"still alive");

    client_container.request_wire().write_terminate().unwrap();
    worker_thread.join().unwrap();
}
