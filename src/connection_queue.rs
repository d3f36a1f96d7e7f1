// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Connection queue (§4.D): slot-based session admission with normal and
// privileged ("admin") quotas. Grounded on
// `tateyama::common::wire::connection_queue` (original_source's `wire.h`)
// for the request/listen/accept/terminate protocol shape, and on
// `original_source/test/.../connection_queue_test.cpp` for the
// normal/admin split (`request_admin`, slot-range partitioning) that the
// plain `wire.h` version does not yet have.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{IpcError, Result};
use crate::semaphore::IpcSemaphore;
use crate::waiter::Waiter;

#[derive(Debug, Clone, Copy)]
enum Decision {
    Accepted(u64),
    Rejected,
}

/// Outcome of [`ConnectionQueue::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    Accepted(u64),
    Rejected,
}

/// What a listener should do after [`ConnectionQueue::listen`] wakes it.
#[derive(Debug, Clone, Copy)]
pub struct PendingDecision {
    /// Absolute slot index in `[0, threads + admin_sessions)`.
    pub slot: usize,
    pub is_admin: bool,
}

struct QueueHalf {
    quota: usize,
    slot_base: usize,
    requested: AtomicUsize,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    disconnected: AtomicUsize,
    decisions: Mutex<HashMap<usize, Decision>>,
    decide_waiter: Waiter,
}

impl QueueHalf {
    fn open(name: &str, quota: usize, slot_base: usize) -> Result<Self> {
        Ok(Self {
            quota,
            slot_base,
            requested: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
            decisions: Mutex::new(HashMap::new()),
            decide_waiter: Waiter::open(name)?,
        })
    }

    fn decided(&self) -> usize {
        self.accepted.load(Ordering::Acquire) + self.rejected.load(Ordering::Acquire)
    }

    fn has_undecided(&self) -> bool {
        self.decided() < self.requested.load(Ordering::Acquire)
    }

    fn slot_of(&self, seq: usize) -> usize {
        self.slot_base + ((seq - 1) % self.quota)
    }

    fn request(&self) -> Result<usize> {
        let seq = self.requested.fetch_add(1, Ordering::AcqRel) + 1;
        if seq - self.decided() > self.quota {
            // Roll back: this request never happened from the quota's
            // point of view, matching "fail fast" per §4.D / scenario 6.
            self.requested.fetch_sub(1, Ordering::AcqRel);
            return Err(IpcError::ConnectionQueueProtocol(
                "connection quota exceeded".to_owned(),
            ));
        }
        Ok(seq)
    }

    fn wait(&self, seq: usize, timeout_ms: u64) -> Result<ConnectResult> {
        loop {
            if let Some(d) = self.decisions.lock().unwrap().remove(&seq) {
                return Ok(match d {
                    Decision::Accepted(id) => ConnectResult::Accepted(id),
                    Decision::Rejected => ConnectResult::Rejected,
                });
            }
            let ok = self
                .decide_waiter
                .wait_if(|| !self.decisions.lock().unwrap().contains_key(&seq), Some(timeout_ms))?;
            if !ok {
                return Err(IpcError::Timeout);
            }
        }
    }

    fn decide(&self, slot: usize, decision: Decision) -> Result<()> {
        let seq = self.decided() + 1;
        if self.slot_of(seq) != slot {
            return Err(IpcError::ConnectionQueueProtocol(format!(
                "slot {slot} does not match expected sequential decision slot"
            )));
        }
        match decision {
            Decision::Accepted(_) => {
                self.accepted.fetch_add(1, Ordering::AcqRel);
            }
            Decision::Rejected => {
                self.rejected.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.decisions.lock().unwrap().insert(seq, decision);
        self.decide_waiter.broadcast()?;
        Ok(())
    }
}

/// Global per-database admission queue (§4.D). Lives in the database's
/// shared-memory segment alongside the status memory (§4.J).
pub struct ConnectionQueue {
    threads: usize,
    admin_sessions: usize,
    normal: QueueHalf,
    admin: QueueHalf,
    slot_table: Mutex<Vec<Option<u64>>>,
    terminate: AtomicBool,
    request_waiter: Waiter,
    terminate_confirm: IpcSemaphore,
}

impl ConnectionQueue {
    pub fn open(name_prefix: &str, threads: usize, admin_sessions: usize) -> Result<Self> {
        Ok(Self {
            threads,
            admin_sessions,
            normal: QueueHalf::open(&format!("{name_prefix}_NORMAL"), threads, 0)?,
            admin: QueueHalf::open(&format!("{name_prefix}_ADMIN"), admin_sessions, threads)?,
            slot_table: Mutex::new(vec![None; threads + admin_sessions]),
            terminate: AtomicBool::new(false),
            request_waiter: Waiter::open(&format!("{name_prefix}_REQUEST"))?,
            terminate_confirm: IpcSemaphore::open(&format!("{name_prefix}_TERMCONFIRM"), 0)
                .map_err(IpcError::Platform)?,
        })
    }

    fn half_for_slot(&self, slot: usize) -> &QueueHalf {
        if slot < self.threads {
            &self.normal
        } else {
            &self.admin
        }
    }

    /// Client-side: request a normal connection slot. Fails fast if the
    /// normal quota (`threads`) is exhausted.
    pub fn request(&self) -> Result<usize> {
        let seq = self.normal.request()?;
        self.request_waiter.notify()?;
        Ok(seq)
    }

    /// Client-side: request a privileged connection slot. Fails fast if
    /// the admin quota (`admin_sessions`) is exhausted.
    pub fn request_admin(&self) -> Result<usize> {
        let seq = self.admin.request()?;
        self.request_waiter.notify()?;
        Ok(seq)
    }

    /// Client-side: block until the listener has decided sequence `seq`
    /// from the normal half.
    pub fn wait(&self, seq: usize, timeout_ms: u64) -> Result<ConnectResult> {
        self.normal.wait(seq, timeout_ms)
    }

    /// Client-side: block until the listener has decided sequence `seq`
    /// from the admin half.
    pub fn wait_admin(&self, seq: usize, timeout_ms: u64) -> Result<ConnectResult> {
        self.admin.wait(seq, timeout_ms)
    }

    /// Listener-side: block until a sequence is undecided in either half,
    /// or termination is requested.
    pub fn listen(&self, timeout_ms: u64) -> Result<Option<PendingDecision>> {
        loop {
            if self.normal.has_undecided() {
                let seq = self.normal.decided() + 1;
                return Ok(Some(PendingDecision {
                    slot: self.normal.slot_of(seq),
                    is_admin: false,
                }));
            }
            if self.admin.has_undecided() {
                let seq = self.admin.decided() + 1;
                return Ok(Some(PendingDecision {
                    slot: self.admin.slot_of(seq),
                    is_admin: true,
                }));
            }
            if self.terminate.load(Ordering::Acquire) {
                return Ok(None);
            }
            let ok = self.request_waiter.wait_if(
                || {
                    !self.normal.has_undecided()
                        && !self.admin.has_undecided()
                        && !self.terminate.load(Ordering::Acquire)
                },
                Some(timeout_ms),
            )?;
            if !ok {
                return Err(IpcError::Timeout);
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Listener-side: accept the pending decision at `slot`, publishing
    /// `session_id` to the waiting client and recording it in the slot
    /// table (§4.J's "which sessions are open" answer).
    pub fn accept(&self, slot: usize, session_id: u64) -> Result<()> {
        self.half_for_slot(slot)
            .decide(slot, Decision::Accepted(session_id))?;
        self.slot_table.lock().unwrap()[slot] = Some(session_id);
        Ok(())
    }

    /// Listener-side: reject the pending decision at `slot` (e.g. setup
    /// failure constructing the session segment).
    pub fn reject(&self, slot: usize) -> Result<()> {
        self.half_for_slot(slot).decide(slot, Decision::Rejected)
    }

    /// Listener-side: reclaim a slot whose session has ended.
    pub fn disconnect(&self, slot: usize) -> Result<()> {
        self.half_for_slot(slot)
            .disconnected
            .fetch_add(1, Ordering::AcqRel);
        self.slot_table.lock().unwrap()[slot] = None;
        Ok(())
    }

    /// Snapshot of `(slot, session_id)` for every currently live session —
    /// backs the status memory's slot table (§4.J).
    pub fn live_sessions(&self) -> Vec<(usize, u64)> {
        self.slot_table
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|id| (i, id)))
            .collect()
    }

    /// Request shutdown orchestrator-side: wake the listener and block
    /// until it confirms via [`confirm_terminated`], by waiting on the
    /// named semaphore the listener releases (§4.D: "the listener confirms
    /// by releasing a named semaphore, unblocking a shutdown orchestrator").
    pub fn request_terminate(&self) -> io::Result<()> {
        self.terminate.store(true, Ordering::Release);
        self.request_waiter.broadcast()?;
        self.terminate_confirm.wait(None)?;
        Ok(())
    }

    /// Listener-side: confirm to the orchestrator that the listen loop
    /// has exited.
    pub fn confirm_terminated(&self) -> io::Result<()> {
        self.terminate_confirm.post(1)
    }

    /// Remove every named primitive a queue opened under `name_prefix`,
    /// without needing a live handle. Used by the listener's stale-segment
    /// sweep (§5 "Liveness under partial failure") when a prior server
    /// process crashed without releasing its status-memory lock.
    pub fn clear_storage(name_prefix: &str) {
        crate::waiter::Waiter::clear_storage(&format!("{name_prefix}_NORMAL"));
        crate::waiter::Waiter::clear_storage(&format!("{name_prefix}_ADMIN"));
        crate::waiter::Waiter::clear_storage(&format!("{name_prefix}_REQUEST"));
        crate::semaphore::IpcSemaphore::clear_storage(&format!("{name_prefix}_TERMCONFIRM"));
    }
}
