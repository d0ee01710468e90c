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

//! Process-local lock service.
//!
//! The session of a lock is the thread that acquired it, mirroring a
//! connection-per-thread database setup. Bounded waits use
//! `Condvar::wait_timeout` directly instead of polling.

use crate::error::Result;
use crate::locking::backend::LockBackend;
use crate::locking::hashing::LockId;
use crate::locking::timeout::LockTimeoutValue;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct InMemoryLockBackend {
    holders: Mutex<HashMap<LockId, ThreadId>>,
    released: Condvar,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, id: LockId) -> bool {
        self.table().contains_key(&id)
    }

    pub fn held_count(&self) -> usize {
        self.table().len()
    }

    // Every critical section leaves the table consistent, so a poisoned
    // mutex still guards valid state.
    fn table(&self) -> MutexGuard<'_, HashMap<LockId, ThreadId>> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until_free<'a>(
        &self,
        mut holders: MutexGuard<'a, HashMap<LockId, ThreadId>>,
        id: LockId,
    ) -> MutexGuard<'a, HashMap<LockId, ThreadId>> {
        while holders.contains_key(&id) {
            holders = self
                .released
                .wait(holders)
                .unwrap_or_else(PoisonError::into_inner);
        }
        holders
    }

    fn wait_with_budget<'a>(
        &self,
        mut holders: MutexGuard<'a, HashMap<LockId, ThreadId>>,
        id: LockId,
        budget: Duration,
    ) -> Option<MutexGuard<'a, HashMap<LockId, ThreadId>>> {
        let Some(deadline) = Instant::now().checked_add(budget) else {
            return Some(self.wait_until_free(holders, id));
        };

        while holders.contains_key(&id) {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .released
                .wait_timeout(holders, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            holders = guard;
            trace!("Woke up while waiting for in-memory lock {id}");
        }
        Some(holders)
    }
}

impl LockBackend for InMemoryLockBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn acquire(&self, id: LockId, timeout: LockTimeoutValue) -> Result<bool> {
        let session = thread::current().id();
        let holders = self.table();

        let mut holders = match timeout {
            LockTimeoutValue::Infinite => self.wait_until_free(holders, id),
            LockTimeoutValue::Finite(budget) => match self.wait_with_budget(holders, id, budget) {
                Some(holders) => holders,
                None => {
                    debug!("In-memory lock {id} still held after {timeout}");
                    return Ok(false);
                }
            },
        };

        holders.insert(id, session);
        debug!("In-memory lock {id} granted to {session:?}");
        Ok(true)
    }

    fn release(&self, id: LockId) -> Result<()> {
        let session = thread::current().id();
        let mut holders = self.table();

        match holders.get(&id) {
            Some(owner) if *owner == session => {
                holders.remove(&id);
                drop(holders);
                self.released.notify_all();
                debug!("In-memory lock {id} released by {session:?}");
            }
            Some(owner) => {
                debug!("Ignoring release of lock {id}: held by {owner:?}, not {session:?}");
            }
            None => {
                trace!("Ignoring release of lock {id}: not held");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn id(key: &str) -> LockId {
        LockId::from_key(key)
    }

    #[test]
    fn acquire_and_release_updates_table() {
        let backend = InMemoryLockBackend::new();
        assert!(
            backend
                .acquire(id("stock:ABC"), LockTimeoutValue::Infinite)
                .unwrap()
        );
        assert!(backend.is_held(id("stock:ABC")));
        assert_eq!(backend.held_count(), 1);

        backend.release(id("stock:ABC")).unwrap();
        assert!(!backend.is_held(id("stock:ABC")));
    }

    #[test]
    fn release_is_idempotent() {
        let backend = InMemoryLockBackend::new();
        backend.release(id("never-taken")).unwrap();

        backend
            .acquire(id("k"), LockTimeoutValue::from_millis(10))
            .unwrap();
        backend.release(id("k")).unwrap();
        backend.release(id("k")).unwrap();
        assert_eq!(backend.held_count(), 0);
    }

    #[test]
    fn release_from_other_session_is_ignored() {
        let backend = Arc::new(InMemoryLockBackend::new());
        backend
            .acquire(id("k"), LockTimeoutValue::Infinite)
            .unwrap();

        let other = Arc::clone(&backend);
        thread::spawn(move || other.release(id("k")).unwrap())
            .join()
            .unwrap();

        assert!(backend.is_held(id("k")));
        backend.release(id("k")).unwrap();
    }

    #[test]
    fn bounded_wait_times_out_after_budget() {
        let backend = Arc::new(InMemoryLockBackend::new());
        backend
            .acquire(id("k"), LockTimeoutValue::Infinite)
            .unwrap();

        let contender = Arc::clone(&backend);
        let (acquired, waited) = thread::spawn(move || {
            let start = Instant::now();
            let acquired = contender
                .acquire(id("k"), LockTimeoutValue::from_millis(100))
                .unwrap();
            (acquired, start.elapsed())
        })
        .join()
        .unwrap();

        assert!(!acquired);
        assert!(
            waited >= Duration::from_millis(95),
            "contender gave up too early: {waited:?}"
        );
        backend.release(id("k")).unwrap();
    }

    #[test]
    fn zero_budget_acquires_free_lock() {
        let backend = InMemoryLockBackend::new();
        assert!(
            backend
                .acquire(id("k"), LockTimeoutValue::from_secs(0))
                .unwrap()
        );
    }

    #[test]
    fn blocking_wait_resumes_after_release() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let barrier = Arc::new(Barrier::new(2));

        let holder_backend = Arc::clone(&backend);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            holder_backend
                .acquire(id("k"), LockTimeoutValue::Infinite)
                .unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(100));
            holder_backend.release(id("k")).unwrap();
        });

        barrier.wait();
        let start = Instant::now();
        assert!(
            backend
                .acquire(id("k"), LockTimeoutValue::Infinite)
                .unwrap()
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
        holder.join().unwrap();
        backend.release(id("k")).unwrap();
    }

    #[test]
    fn same_session_is_not_reentrant() {
        let backend = InMemoryLockBackend::new();
        assert!(
            backend
                .acquire(id("k"), LockTimeoutValue::Infinite)
                .unwrap()
        );
        assert!(
            !backend
                .acquire(id("k"), LockTimeoutValue::from_millis(20))
                .unwrap()
        );
        backend.release(id("k")).unwrap();
    }
}
