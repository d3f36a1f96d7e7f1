// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two of spec.md §8's six end-to-end scenarios not already covered by
// `test_worker_lifecycle.rs`: result-set streaming (scenario 2) and a
// disallowed privileged blob (scenario 5), both driven through a real
// Worker over an actual shared-memory session segment.

use std::sync::Arc;
use std::thread;

use tateyama_ipc::protocol::broker::{BrokerCommand, BROKER_SERVICE_ID};
use tateyama_ipc::protocol::envelope::{
    decode_response_payload, encode_request_payload, Diagnostic, FrameworkHeader, PayloadType,
};
use tateyama_ipc::{
    BlobDescriptor, IpcEndpointConfig, NullAuthenticationProvider, Request, Response,
    Result as IpcResult, Service, ServiceTable, SessionConfig, SessionContainer, Worker,
};

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

fn do_handshake(client_container: &SessionContainer) {
    let header = FrameworkHeader {
        session_id: 0,
        service_id: BROKER_SERVICE_ID,
        blobs: vec![],
    };
    let command = BrokerCommand::Handshake {
        connection_label: "test-conn".into(),
        application_name: "test-client".into(),
        credential: None,
    };
    let payload = encode_request_payload(&header, &command.encode());
    client_container.request_wire().write(1, &payload).unwrap();
    let response_header = client_container.response_wire().await_header(5000).unwrap();
    let _ = client_container.response_wire().read(&response_header).unwrap();
}

const STREAM_SERVICE_ID: u64 = 77;
const BLOB_SERVICE_ID: u64 = 78;

/// Writes two records into its acquired channel, then a final body naming
/// the row count — the shape any result-set-producing service follows
/// (§4.E/§4.B: request_channel -> acquire_channel -> write/commit per
/// record -> release_channel -> set_eor -> body).
struct StreamingRows(Vec<&'static [u8]>);

impl Service for StreamingRows {
    fn call(&self, _request: &Request, response: &Response) -> IpcResult<()> {
        response.request_channel()?;
        let slot = response.acquire_channel()?;
        let resultset = response.resultset();
        for row in &self.0 {
            resultset.write(slot, row)?;
            resultset.commit(slot)?;
        }
        response.release_channel(slot)?;
        resultset.set_eor()?;
        response.body(&(self.0.len() as u32).to_be_bytes())
    }
}

/// A service that never gets invoked in the blob-disallowed scenario; if
/// it were called the test's assertions on the diagnostic would fail to
/// see `OPERATION_DENIED`, which is what actually guards against it.
struct UnreachableIfBlobRejected;

impl Service for UnreachableIfBlobRejected {
    fn call(&self, request: &Request, response: &Response) -> IpcResult<()> {
        response.body(request.payload())
    }
}

#[test]
fn scenario_result_set_streaming_end_to_end() {
    let cfg = test_config("wtest-resultset");
    let session_id = 10u64;

    let server_container =
        Arc::new(SessionContainer::create("wtest-resultset", session_id, &cfg).unwrap());
    let client_container = SessionContainer::open("wtest-resultset", session_id, &cfg).unwrap();

    let service_table = Arc::new(ServiceTable::new());
    service_table.register(
        STREAM_SERVICE_ID,
        Arc::new(StreamingRows(vec![b"row-one", b"row-two"])),
    );

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

    do_handshake(&client_container);

    let header = FrameworkHeader {
        session_id,
        service_id: STREAM_SERVICE_ID,
        blobs: vec![],
    };
    let payload = encode_request_payload(&header, b"select * from rows");
    client_container.request_wire().write(2, &payload).unwrap();

    // Drain every record the service streams before its final reply
    // arrives (§8 scenario 2: "client reads chunk, then EOR, then body").
    let client_resultset = client_container.resultset();
    let mut rows: Vec<Vec<u8>> = Vec::new();
    loop {
        match client_resultset.active_wire(Some(5000)) {
            Ok(Some(slot)) => {
                let (first, rest) = client_resultset.get_chunk(slot, 5000).unwrap();
                let mut data = first;
                if let Some(rest) = rest {
                    data.extend_from_slice(&rest);
                }
                let read_point = client_resultset.read_point(slot);
                client_resultset.dispose(slot, read_point).unwrap();
                rows.push(data);
            }
            Ok(None) => break,
            Err(e) => panic!("unexpected error draining result set: {e}"),
        }
    }
    assert_eq!(rows, vec![b"row-one".to_vec(), b"row-two".to_vec()]);

    let response_header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&response_header).unwrap();
    let (fh, result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServiceResult);
    assert_eq!(result, 2u32.to_be_bytes());

    client_container.request_wire().write_terminate().unwrap();
    worker_thread.join().unwrap();
}

#[test]
fn scenario_privileged_blob_disallowed_end_to_end() {
    // allow_blob_privileged is false, so a request carrying a `temporary`
    // blob descriptor is rejected before the service ever runs (§4.E/§4.H:
    // "if req.blob_error != ok, immediately writes a diagnostic and
    // returns failure").
    let cfg = test_config("wtest-blob-denied");
    let session_id = 11u64;

    let server_container =
        Arc::new(SessionContainer::create("wtest-blob-denied", session_id, &cfg).unwrap());
    let client_container = SessionContainer::open("wtest-blob-denied", session_id, &cfg).unwrap();

    let service_table = Arc::new(ServiceTable::new());
    service_table.register(BLOB_SERVICE_ID, Arc::new(UnreachableIfBlobRejected));

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

    do_handshake(&client_container);

    let header = FrameworkHeader {
        session_id,
        service_id: BLOB_SERVICE_ID,
        blobs: vec![BlobDescriptor {
            channel_name: "dump".into(),
            path: "/tmp/wtest-blob-denied-does-not-matter".into(),
            temporary: true,
        }],
    };
    let payload = encode_request_payload(&header, b"whatever the service would have echoed");
    client_container.request_wire().write(2, &payload).unwrap();

    let response_header = client_container.response_wire().await_header(5000).unwrap();
    let body = client_container.response_wire().read(&response_header).unwrap();
    let (fh, result) = decode_response_payload(&body).unwrap();
    assert_eq!(fh.payload_type, PayloadType::ServerDiagnostics);
    let diag = Diagnostic::decode(&result).unwrap();
    assert_eq!(diag.code, tateyama_ipc::error::DiagnosticCode::OperationDenied);

    // The session is still usable afterwards — a denied blob does not tear
    // down the session, only the one request.
    client_container.request_wire().write_terminate().unwrap();
    worker_thread.join().unwrap();
}
