// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Session-scoped element store (§4.F). Grounded on
// `tateyama::api::server::session_store` (original_source): services stash
// per-session resources (cursors, prepared statement handles) here under a
// key they choose, and get them back on a later request in the same
// session. Each element is disposed exactly once — either explicitly via
// `take`, or implicitly when the store itself closes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{IpcError, Result};

type Element = Arc<dyn Any + Send + Sync>;
type DisposeFn = Box<dyn FnMut() + Send + Sync>;

/// An element plus the callback that disposes it. The callback runs
/// exactly once — on an explicit `take`/`remove`, or on `close` — even if
/// `value` is still referenced elsewhere via a cloned `Arc` (§9 "Session
/// store": "every element's `dispose()` is called exactly once even if the
/// element is still externally referenced").
struct Entry {
    value: Element,
    dispose: Option<DisposeFn>,
}

impl Entry {
    fn dispose_once(&mut self) {
        if let Some(mut d) = self.dispose.take() {
            d();
        }
    }
}

/// A session's keyed bag of opaque service-owned resources. One instance
/// lives for as long as the session does; the worker closes it when the
/// session shuts down, disposing whatever elements remain.
#[derive(Default)]
pub struct SessionStore {
    elements: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` with no associated dispose action,
    /// replacing (and disposing) anything already there. Rejected once the
    /// session has shut down (§4.F: "refuses further puts after shutdown").
    pub fn put<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Result<()> {
        self.put_with_dispose(key, value, || {})
    }

    /// Store `value` under `key`, registering `dispose` to run exactly once
    /// when the element is removed or the store closes, regardless of
    /// whether other `Arc` clones of the value outlive that point.
    pub fn put_with_dispose<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        dispose: impl FnMut() + Send + Sync + 'static,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IpcError::SessionClosed);
        }
        let mut elements = self.elements.lock().unwrap();
        let entry = Entry {
            value: Arc::new(value),
            dispose: Some(Box::new(dispose)),
        };
        if let Some(mut previous) = elements.insert(key.into(), entry) {
            previous.dispose_once();
        }
        Ok(())
    }

    /// Borrow the element stored under `key`, if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let elements = self.elements.lock().unwrap();
        elements
            .get(key)
            .map(|e| Arc::clone(&e.value))
            .and_then(|e| e.downcast().ok())
    }

    /// Remove the element stored under `key`, running its dispose callback
    /// exactly once, and return the value (still live if referenced
    /// elsewhere).
    pub fn take<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let mut entry = self.elements.lock().unwrap().remove(key)?;
        entry.dispose_once();
        entry.value.downcast().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.elements.lock().unwrap().contains_key(key)
    }

    /// Close the store, disposing every element still held and refusing
    /// subsequent `put`s. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut elements = self.elements.lock().unwrap();
        for (_, mut entry) in elements.drain() {
            entry.dispose_once();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
