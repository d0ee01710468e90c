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

//! Capability interface over the external lock service.

use crate::error::Result;
use crate::locking::hashing::LockId;
use crate::locking::timeout::LockTimeoutValue;
use std::sync::Arc;

/// Minimal contract a coordination service must offer.
///
/// Implementations must honour two rules:
///
/// * `acquire` with [`LockTimeoutValue::Infinite`] blocks until the lock is
///   granted and never returns `Ok(false)`; with a finite budget it returns
///   `Ok(false)` once the budget is spent, without blocking materially longer.
/// * `release` is idempotent and succeeds when the calling session does not
///   hold `id`, so it can be called unconditionally from cleanup paths.
///
/// Mutual exclusion is only as strong as the service's notion of a session.
/// If a holder's session is reused by an unrelated caller while the lock is
/// held, that caller shares the lock.
pub trait LockBackend: Send + Sync {
    /// Short label used in logs and errors.
    fn name(&self) -> &'static str;

    fn acquire(&self, id: LockId, timeout: LockTimeoutValue) -> Result<bool>;

    fn release(&self, id: LockId) -> Result<()>;
}

impl<B: LockBackend + ?Sized> LockBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn acquire(&self, id: LockId, timeout: LockTimeoutValue) -> Result<bool> {
        (**self).acquire(id, timeout)
    }

    fn release(&self, id: LockId) -> Result<()> {
        (**self).release(id)
    }
}

impl<B: LockBackend + ?Sized> LockBackend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn acquire(&self, id: LockId, timeout: LockTimeoutValue) -> Result<bool> {
        (**self).acquire(id, timeout)
    }

    fn release(&self, id: LockId) -> Result<()> {
        (**self).release(id)
    }
}
