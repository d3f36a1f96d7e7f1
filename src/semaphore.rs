// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process counting semaphore.
// Delegates to platform::PlatformSemaphore (POSIX sem_open / Win32
// CreateSemaphoreW). Used by the connection queue's termination handshake
// (§4.D: "the listener confirms by releasing a named semaphore, unblocking
// a shutdown orchestrator").

use std::io;

use crate::platform::PlatformSemaphore;

/// A named, inter-process counting semaphore.
pub struct IpcSemaphore {
    inner: PlatformSemaphore,
}

impl IpcSemaphore {
    /// Open (or create) a named semaphore with the given initial count.
    pub fn open(name: &str, initial: u32) -> io::Result<Self> {
        let inner = PlatformSemaphore::open(name, initial)?;
        Ok(Self { inner })
    }

    /// Block until the count is positive, then decrement it. With
    /// `timeout_ms = None`, blocks indefinitely. Returns `Ok(false)` on
    /// timeout, never spuriously `Ok(true)`.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(timeout_ms)
    }

    /// Increment the count by `n`, waking up to `n` waiters.
    pub fn post(&self, n: u32) -> io::Result<()> {
        self.inner.post(n)
    }

    /// Remove the backing storage for a named semaphore (static helper).
    pub fn clear_storage(name: &str) {
        PlatformSemaphore::clear_storage(name);
    }
}
