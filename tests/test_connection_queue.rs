// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Connection queue scenarios beyond the in-file unit tests: the admin-quota
// end-to-end path (§8 scenario 6) and the listener-termination handshake
// over the named confirm semaphore (§4.D).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tateyama_ipc::connection_queue::{ConnectResult, ConnectionQueue};
use tateyama_ipc::error::IpcError;

#[test]
fn admin_quota_is_independent_of_normal_quota() {
    let q = ConnectionQueue::open("cq_admin_independent", 1, 2).unwrap();

    // Exhaust the normal quota; the admin half must still have room.
    assert!(q.request().is_ok());
    assert!(q.request().is_err());

    assert!(q.request_admin().is_ok());
    assert!(q.request_admin().is_ok());
    assert!(
        q.request_admin().is_err(),
        "third admin request must fail fast once the admin quota is exhausted"
    );
}

#[test]
fn admin_scenario_end_to_end_accept_and_reject() {
    let q = Arc::new(ConnectionQueue::open("cq_admin_e2e", 2, 2).unwrap());

    let seq_accept = q.request_admin().unwrap();
    let seq_reject = q.request_admin().unwrap();

    let pending_one = q.listen(1000).unwrap().unwrap();
    assert!(pending_one.is_admin);
    q.accept(pending_one.slot, 900).unwrap();

    let pending_two = q.listen(1000).unwrap().unwrap();
    assert!(pending_two.is_admin);
    q.reject(pending_two.slot).unwrap();

    assert_eq!(
        q.wait_admin(seq_accept, 1000).unwrap(),
        ConnectResult::Accepted(900)
    );
    assert_eq!(q.wait_admin(seq_reject, 1000).unwrap(), ConnectResult::Rejected);
    assert_eq!(q.live_sessions(), vec![(pending_one.slot, 900)]);
}

#[test]
fn normal_and_admin_slots_occupy_disjoint_ranges() {
    let q = ConnectionQueue::open("cq_admin_disjoint", 3, 2).unwrap();
    q.request().unwrap();
    let normal_pending = q.listen(1000).unwrap().unwrap();
    q.accept(normal_pending.slot, 1).unwrap();
    assert!(normal_pending.slot < 3);

    q.request_admin().unwrap();
    let admin_pending = q.listen(1000).unwrap().unwrap();
    q.accept(admin_pending.slot, 2).unwrap();
    assert!(admin_pending.slot >= 3);
}

#[test]
fn listen_times_out_with_nothing_pending() {
    let q = ConnectionQueue::open("cq_listen_timeout", 2, 1).unwrap();
    assert!(matches!(q.listen(50), Err(IpcError::Timeout)));
}

#[test]
fn request_terminate_unblocks_listener_and_confirms() {
    let q = Arc::new(ConnectionQueue::open("cq_terminate", 2, 1).unwrap());

    let listener_queue = Arc::clone(&q);
    let listener = thread::spawn(move || {
        // Loop exactly as `Listener::run` does: timeouts just retry.
        loop {
            match listener_queue.listen(200) {
                Ok(None) => break,
                Ok(Some(_)) => unreachable!("no connections were requested"),
                Err(IpcError::Timeout) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        listener_queue.confirm_terminated().unwrap();
    });

    // Give the listener thread a moment to enter its first `listen` wait.
    thread::sleep(Duration::from_millis(50));
    q.request_terminate().unwrap();
    listener.join().unwrap();
    assert!(q.is_terminated());
}
