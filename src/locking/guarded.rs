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

//! Declarative wrapper that runs an operation under a key derived from its
//! own arguments.
//!
//! ```no_run
//! use concurrency_safe::locking::{
//!     ConcurrencySafe, ConflictPolicy, InMemoryLockBackend, KeyTemplate, LockTimeoutValue,
//! };
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let buy = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
//!     .timeout(LockTimeoutValue::from_secs(2))
//!     .on_conflict(ConflictPolicy::handler(|_: &BTreeMap<String, String>| "busy, try again"))
//!     .build(Arc::new(InMemoryLockBackend::new()), |_args| "sold");
//!
//! let args = BTreeMap::from([("sku".to_string(), "ABC".to_string())]);
//! assert_eq!(buy.call(&args).unwrap(), Some("sold"));
//! ```

use crate::error::{ConcurrencySafeError, Result};
use crate::locking::backend::LockBackend;
use crate::locking::coordinator::{LockCoordinator, with_lock};
use crate::locking::key::{KeyArgs, KeyTemplate};
use crate::locking::timeout::{DEFAULT_LOCK_TIMEOUT, LockTimeoutValue};
use log::debug;
use std::fmt;
use std::sync::Arc;

type Operation<A, R> = dyn Fn(&A) -> R + Send + Sync;

/// What a decorated call does when the lock is not granted in time.
pub enum ConflictPolicy<A, R> {
    /// Return `LockAcquireTimeout` to the caller.
    Raise,
    /// Return `Ok(None)`.
    ReturnEmpty,
    /// Call the handler with the same arguments and return its value.
    Handler(Arc<Operation<A, R>>),
}

impl<A, R> ConflictPolicy<A, R> {
    pub fn handler<F>(handler: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        ConflictPolicy::Handler(Arc::new(handler))
    }
}

impl<A, R> Default for ConflictPolicy<A, R> {
    fn default() -> Self {
        ConflictPolicy::Raise
    }
}

impl<A, R> Clone for ConflictPolicy<A, R> {
    fn clone(&self) -> Self {
        match self {
            ConflictPolicy::Raise => ConflictPolicy::Raise,
            ConflictPolicy::ReturnEmpty => ConflictPolicy::ReturnEmpty,
            ConflictPolicy::Handler(handler) => ConflictPolicy::Handler(Arc::clone(handler)),
        }
    }
}

impl<A, R> fmt::Debug for ConflictPolicy<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Raise => f.write_str("Raise"),
            ConflictPolicy::ReturnEmpty => f.write_str("ReturnEmpty"),
            ConflictPolicy::Handler(_) => f.write_str("Handler(<function>)"),
        }
    }
}

/// An operation that only runs while holding the lock for its key.
///
/// Shareable across threads; each call resolves its own key.
pub struct ConcurrencySafe<A, R> {
    template: KeyTemplate<A>,
    timeout: LockTimeoutValue,
    policy: ConflictPolicy<A, R>,
    backend: Arc<dyn LockBackend>,
    operation: Arc<Operation<A, R>>,
}

pub struct ConcurrencySafeBuilder<A, R> {
    template: KeyTemplate<A>,
    timeout: Option<LockTimeoutValue>,
    policy: ConflictPolicy<A, R>,
}

impl<A, R> ConcurrencySafe<A, R> {
    pub fn builder(template: KeyTemplate<A>) -> ConcurrencySafeBuilder<A, R> {
        ConcurrencySafeBuilder {
            template,
            timeout: None,
            policy: ConflictPolicy::Raise,
        }
    }

    pub fn timeout(&self) -> LockTimeoutValue {
        self.timeout
    }

    pub fn policy(&self) -> &ConflictPolicy<A, R> {
        &self.policy
    }

    pub fn template(&self) -> &KeyTemplate<A> {
        &self.template
    }
}

impl<A, R> ConcurrencySafeBuilder<A, R> {
    /// Wait budget for the lock; defaults to three seconds, or to the
    /// coordinator's default when built with [`Self::build_with`].
    pub fn timeout(mut self, timeout: impl Into<LockTimeoutValue>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn on_conflict(mut self, policy: ConflictPolicy<A, R>) -> Self {
        self.policy = policy;
        self
    }

    pub fn build<F>(self, backend: Arc<dyn LockBackend>, operation: F) -> ConcurrencySafe<A, R>
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        ConcurrencySafe {
            template: self.template,
            timeout: self.timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT),
            policy: self.policy,
            backend,
            operation: Arc::new(operation),
        }
    }

    pub fn build_with<F>(self, coordinator: &LockCoordinator, operation: F) -> ConcurrencySafe<A, R>
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let timeout = self.timeout.unwrap_or(coordinator.default_timeout());
        self.timeout(timeout)
            .build(Arc::clone(coordinator.backend()), operation)
    }
}

impl<A: KeyArgs, R> ConcurrencySafe<A, R> {
    /// Key this call would lock.
    pub fn key_for(&self, args: &A) -> Result<String> {
        Ok(self.template.resolve(args)?)
    }

    /// Runs the operation under its lock.
    ///
    /// Returns `Ok(Some(value))` with the operation's (or conflict handler's)
    /// value and `Ok(None)` only for [`ConflictPolicy::ReturnEmpty`] timeouts.
    /// Template errors surface before the backend is contacted, and errors
    /// other than a lock timeout are never absorbed by the policy.
    pub fn call(&self, args: &A) -> Result<Option<R>> {
        let key = self.template.resolve(args)?;

        match with_lock(self.backend.as_ref(), &key, self.timeout, || {
            (self.operation)(args)
        }) {
            Ok(value) => Ok(Some(value)),
            Err(ConcurrencySafeError::LockAcquireTimeout { key, timeout }) => match &self.policy {
                ConflictPolicy::Raise => {
                    Err(ConcurrencySafeError::LockAcquireTimeout { key, timeout })
                }
                ConflictPolicy::ReturnEmpty => {
                    debug!("Lock '{key}' busy; returning no result");
                    Ok(None)
                }
                ConflictPolicy::Handler(handler) => {
                    debug!("Lock '{key}' busy; delegating to conflict handler");
                    Ok(Some(handler(args)))
                }
            },
            Err(err) => Err(err),
        }
    }
}

impl<A, R> fmt::Debug for ConcurrencySafe<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencySafe")
            .field("template", &self.template)
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::hashing::LockId;
    use crate::locking::memory::InMemoryLockBackend;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    type Args = BTreeMap<String, String>;

    fn sku(value: &str) -> Args {
        BTreeMap::from([("sku".to_string(), value.to_string())])
    }

    /// Holds `key` on a separate thread until the returned sender fires.
    fn hold(backend: &Arc<InMemoryLockBackend>, key: &str) -> (mpsc::Sender<()>, JoinHandle<()>) {
        let (release_tx, release_rx) = mpsc::channel();
        let (held_tx, held_rx) = mpsc::channel();
        let backend = Arc::clone(backend);
        let id = LockId::from_key(key);
        let handle = thread::spawn(move || {
            backend.acquire(id, LockTimeoutValue::Infinite).unwrap();
            held_tx.send(()).unwrap();
            let _ = release_rx.recv();
            backend.release(id).unwrap();
        });
        held_rx.recv().unwrap();
        (release_tx, handle)
    }

    fn counting_op(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn(&Args) -> String + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |args: &Args| {
            calls.fetch_add(1, Ordering::SeqCst);
            format!("bought {}", args["sku"])
        }
    }

    #[test]
    fn returns_operation_result_when_uncontended() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .build(backend.clone(), counting_op(&calls));

        assert_eq!(op.call(&sku("ABC")).unwrap(), Some("bought ABC".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.held_count(), 0);
        assert_eq!(op.timeout(), DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn default_policy_raises_timeout() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .timeout(Duration::from_millis(50))
            .build(backend.clone(), counting_op(&calls));

        let (release, holder) = hold(&backend, "stock:ABC");
        let err = op.call(&sku("ABC")).unwrap_err();
        release.send(()).unwrap();
        holder.join().unwrap();

        match err {
            ConcurrencySafeError::LockAcquireTimeout { key, timeout } => {
                assert_eq!(key, "stock:ABC");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("Expected timeout error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn return_empty_policy_yields_none() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .timeout(Duration::from_millis(50))
            .on_conflict(ConflictPolicy::ReturnEmpty)
            .build(backend.clone(), counting_op(&calls));

        let (release, holder) = hold(&backend, "stock:ABC");
        let outcome = op.call(&sku("ABC")).unwrap();
        release.send(()).unwrap();
        holder.join().unwrap();

        assert_eq!(outcome, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_policy_receives_same_arguments() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .timeout(Duration::from_millis(50))
            .on_conflict(ConflictPolicy::handler(|args: &Args| {
                format!("busy {}", args["sku"])
            }))
            .build(backend.clone(), counting_op(&calls));

        let (release, holder) = hold(&backend, "stock:ABC");
        let outcome = op.call(&sku("ABC")).unwrap();
        release.send(()).unwrap();
        holder.join().unwrap();

        assert_eq!(outcome, Some("busy ABC".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn template_error_fails_before_locking() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{skU}").unwrap())
            .on_conflict(ConflictPolicy::ReturnEmpty)
            .build(backend.clone(), counting_op(&calls));

        let err = op.call(&sku("ABC")).unwrap_err();
        assert_eq!(err.code(), "key_template_error");
        assert!(err.to_string().contains("'skU'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.held_count(), 0);
    }

    #[test]
    fn operation_errors_pass_through_and_release() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("withdraw:user:{user}").unwrap())
            .on_conflict(ConflictPolicy::ReturnEmpty)
            .build(backend.clone(), |_args: &Args| -> std::result::Result<u32, String> {
                Err("insufficient funds".to_string())
            });

        let args = BTreeMap::from([("user".to_string(), "42".to_string())]);
        let outcome = op.call(&args).unwrap();
        assert_eq!(outcome, Some(Err("insufficient funds".to_string())));
        assert!(!backend.is_held(LockId::from_key("withdraw:user:42")));
    }

    #[test]
    fn different_keys_do_not_conflict() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .timeout(Duration::from_millis(50))
            .build(backend.clone(), counting_op(&calls));

        let (release, holder) = hold(&backend, "stock:ABC");
        let outcome = op.call(&sku("XYZ")).unwrap();
        release.send(()).unwrap();
        holder.join().unwrap();

        assert_eq!(outcome, Some("bought XYZ".to_string()));
    }

    #[test]
    fn build_with_inherits_coordinator_timeout() {
        let coordinator = LockCoordinator::new(
            Arc::new(InMemoryLockBackend::new()),
            LockTimeoutValue::Infinite,
        );
        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .build_with(&coordinator, |args: &Args| args["sku"].len());
        assert_eq!(op.timeout(), LockTimeoutValue::Infinite);
        assert_eq!(op.call(&sku("ABC")).unwrap(), Some(3));

        let op = ConcurrencySafe::builder(KeyTemplate::pattern("stock:{sku}").unwrap())
            .timeout(LockTimeoutValue::from_millis(10))
            .build_with(&coordinator, |args: &Args| args["sku"].len());
        assert_eq!(op.timeout(), LockTimeoutValue::from_millis(10));
    }

    #[test]
    fn key_for_reports_resolved_key() {
        let op = ConcurrencySafe::builder(KeyTemplate::function(|args: &Args| {
            format!("stock:{}", args["sku"].to_lowercase())
        }))
        .build(Arc::new(InMemoryLockBackend::new()), |_args: &Args| ());
        assert_eq!(op.key_for(&sku("ABC")).unwrap(), "stock:abc");
    }
}
