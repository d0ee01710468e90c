// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scoped lock acquisition.
//!
//! A key moves through `Idle → Acquiring → Held → Released`, or ends in
//! `TimedOut` when the backend reports that the budget ran out. Release is
//! only ever issued after a confirmed acquire, exactly once.

use crate::error::{ConcurrencySafeError, Result};
use crate::locking::backend::LockBackend;
use crate::locking::hashing::{LockId, to_lock_id};
use crate::locking::timeout::LockTimeoutValue;
use log::{debug, warn};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Proof that the current call stack holds a lock.
///
/// The lock is released by [`LockGuard::release`] or, failing that, when the
/// guard is dropped, which also covers early returns and panics. The guard
/// is neither `Clone` nor `Send`: it stays with the caller that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    backend: &'a dyn LockBackend,
    key: String,
    id: LockId,
    acquired_at: Instant,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        self.released = true;
        self.backend.release(self.id)?;
        debug!(
            "Released lock '{}' (id {}) after {:.3}s",
            self.key,
            self.id,
            self.held_for().as_secs_f64()
        );
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(err) = self.release_inner() {
            warn!(
                "Failed to release lock '{}' (id {}) during drop: {err}",
                self.key, self.id
            );
        }
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("backend", &self.backend.name())
            .field("key", &self.key)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

/// Acquires `key` through `backend` and returns a guard holding it.
///
/// Fails with [`ConcurrencySafeError::LockAcquireTimeout`] when a finite
/// budget runs out; no release is issued on that path.
pub fn lock<'a>(
    backend: &'a dyn LockBackend,
    key: &str,
    timeout: LockTimeoutValue,
) -> Result<LockGuard<'a>> {
    let id = to_lock_id(key);
    debug!(
        "Acquiring lock '{key}' (id {id}, timeout {timeout}) via {}",
        backend.name()
    );

    let started = Instant::now();
    let acquired = backend.acquire(id, timeout)?;
    let waited = started.elapsed();

    if !acquired {
        return match timeout {
            LockTimeoutValue::Finite(budget) => {
                debug!(
                    "Timed out acquiring lock '{key}' after {:.3}s",
                    waited.as_secs_f64()
                );
                Err(ConcurrencySafeError::LockAcquireTimeout {
                    key: key.to_string(),
                    timeout: budget,
                })
            }
            LockTimeoutValue::Infinite => Err(ConcurrencySafeError::backend(
                backend.name(),
                format!("unbounded acquisition of '{key}' returned without the lock"),
            )),
        };
    }

    debug!(
        "Acquired lock '{key}' (id {id}) after {:.3}s",
        waited.as_secs_f64()
    );
    Ok(LockGuard {
        backend,
        key: key.to_string(),
        id,
        acquired_at: Instant::now(),
        released: false,
        _not_send: PhantomData,
    })
}

/// Runs `block` while holding `key` and returns its value unchanged.
///
/// `block` runs at most once and only after the lock was granted. The lock is
/// released whichever way `block` exits; a failing release after a
/// completed block is logged and does not replace the block's value.
pub fn with_lock<T, F>(
    backend: &dyn LockBackend,
    key: &str,
    timeout: LockTimeoutValue,
    block: F,
) -> Result<T>
where
    F: FnOnce() -> T,
{
    let guard = lock(backend, key, timeout)?;
    let value = block();

    let key = guard.key().to_string();
    if let Err(err) = guard.release() {
        warn!("Failed to release lock '{key}': {err}");
    }
    Ok(value)
}

/// Lock entry point bound to one backend and one default wait budget.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct LockCoordinator {
    backend: Arc<dyn LockBackend>,
    default_timeout: LockTimeoutValue,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, default_timeout: LockTimeoutValue) -> Self {
        Self {
            backend,
            default_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn LockBackend> {
        &self.backend
    }

    pub fn default_timeout(&self) -> LockTimeoutValue {
        self.default_timeout
    }

    pub fn lock(&self, key: &str, timeout: LockTimeoutValue) -> Result<LockGuard<'_>> {
        lock(self.backend.as_ref(), key, timeout)
    }

    pub fn with_lock<T, F>(&self, key: &str, timeout: LockTimeoutValue, block: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        with_lock(self.backend.as_ref(), key, timeout, block)
    }

    pub fn with_default_timeout<T, F>(&self, key: &str, block: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.with_lock(key, self.default_timeout, block)
    }
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("backend", &self.backend.name())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
