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

//! PostgreSQL advisory-lock backend.
//!
//! Advisory locks are application-defined locks identified by a 64-bit
//! integer and scoped to the database session that took them. If the session
//! ends (process crash, dropped connection) the server releases the lock.
//!
//! The backend draws connections from an `r2d2` pool and pins the connection
//! that was granted a lock until that lock is released, so acquire and
//! release always run on the same session. A pinned connection never goes
//! back to the pool while it holds a lock.
//!
//! Bounded waits either poll `pg_try_advisory_lock` (the default) or rely on
//! the server's `lock_timeout` setting with a blocking `pg_advisory_lock`.

use crate::error::{ConcurrencySafeError, Result};
use crate::locking::backend::LockBackend;
use crate::locking::hashing::LockId;
use crate::locking::timeout::LockTimeoutValue;
use log::{debug, info, trace, warn};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use r2d2_postgres::postgres::error::SqlState;
use r2d2_postgres::postgres::{Config, NoTls};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;
type PgConnection = PooledConnection<PostgresConnectionManager<NoTls>>;

const BACKEND_NAME: &str = "postgres";

/// Interval between `pg_try_advisory_lock` attempts while polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a finite wait budget is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryWaitStrategy {
    /// Retry `pg_try_advisory_lock`, sleeping `interval` between attempts.
    /// The overshoot past the deadline is bounded by one interval.
    Poll { interval: Duration },
    /// Block in `pg_advisory_lock` under a session `lock_timeout`.
    Native,
}

impl Default for AdvisoryWaitStrategy {
    fn default() -> Self {
        AdvisoryWaitStrategy::Poll {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A pooled connection that holds an advisory lock, and the thread it was
/// granted to.
struct PinnedSession {
    owner: ThreadId,
    conn: PgConnection,
}

/// Advisory-lock backend over a pool of PostgreSQL sessions.
///
/// Every held lock keeps one pooled connection pinned, so the pool size is
/// the upper limit on locks held at the same time through one backend. When
/// the pool is exhausted a bounded acquire reports a timeout after its
/// budget instead of waiting for the pool.
pub struct PostgresAdvisoryBackend {
    pool: PgPool,
    strategy: AdvisoryWaitStrategy,
    sessions: Mutex<HashMap<LockId, PinnedSession>>,
}

impl PostgresAdvisoryBackend {
    /// Builds a dedicated pool for `url` and verifies that it can connect.
    pub fn connect(url: &str, pool_size: u32, strategy: AdvisoryWaitStrategy) -> Result<Self> {
        let config: Config = url.parse().map_err(|err| {
            ConcurrencySafeError::InvalidConfig(format!("Invalid PostgreSQL URL: {err}"))
        })?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|err| ConcurrencySafeError::backend(BACKEND_NAME, err))?;

        info!(
            "Connected PostgreSQL advisory lock backend (pool size {}, {strategy:?})",
            pool.max_size()
        );
        Ok(Self::from_pool(pool, strategy))
    }

    /// Uses an existing pool, e.g. one shared with the application's queries.
    pub fn from_pool(pool: PgPool, strategy: AdvisoryWaitStrategy) -> Self {
        Self {
            pool,
            strategy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> AdvisoryWaitStrategy {
        self.strategy
    }

    /// Number of locks currently pinned to a session by this backend.
    pub fn held_count(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<LockId, PinnedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_exhausted(&self) -> bool {
        let state = self.pool.state();
        state.connections >= self.pool.max_size() && state.idle_connections == 0
    }

    /// Takes a connection from the pool within the caller's budget.
    ///
    /// `Ok(None)` means every connection stayed busy for the whole finite
    /// budget. An unbounded wait keeps waiting for a free connection.
    fn checkout(&self, timeout: LockTimeoutValue) -> Result<Option<PgConnection>> {
        if let Some(conn) = self.pool.try_get() {
            return Ok(Some(conn));
        }

        loop {
            let wait = match timeout {
                LockTimeoutValue::Finite(budget) => budget,
                LockTimeoutValue::Infinite => self.pool.connection_timeout(),
            };

            match self.pool.get_timeout(wait) {
                Ok(conn) => return Ok(Some(conn)),
                Err(err) if self.pool_exhausted() => {
                    if !timeout.is_infinite() {
                        warn!(
                            "All {} pooled sessions stayed busy for {timeout}; raise \
                             backend.pool_size to hold more locks at once",
                            self.pool.max_size()
                        );
                        return Ok(None);
                    }
                    debug!("Still waiting for a free pooled session: {err}");
                }
                Err(err) => return Err(ConcurrencySafeError::backend(BACKEND_NAME, err)),
            }
        }
    }

    fn pin(&self, id: LockId, conn: PgConnection) {
        let owner = thread::current().id();
        self.sessions().insert(id, PinnedSession { owner, conn });
    }

    fn lock_blocking(&self, conn: &mut PgConnection, id: LockId) -> Result<()> {
        conn.execute("SELECT pg_advisory_lock($1)", &[&id.value()])
            .map_err(|err| ConcurrencySafeError::backend(BACKEND_NAME, err))?;
        Ok(())
    }

    fn try_lock(&self, conn: &mut PgConnection, id: LockId) -> Result<bool> {
        let row = conn
            .query_one("SELECT pg_try_advisory_lock($1)", &[&id.value()])
            .map_err(|err| ConcurrencySafeError::backend(BACKEND_NAME, err))?;
        Ok(row.get::<_, bool>(0))
    }

    fn lock_polling(
        &self,
        conn: &mut PgConnection,
        id: LockId,
        budget: Duration,
        interval: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if self.try_lock(conn, id)? {
                return Ok(true);
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                debug!("Advisory lock {id} still busy after {attempts} attempts");
                return Ok(false);
            }

            let sleep_for = interval.min(budget - elapsed);
            trace!("Advisory lock {id} busy; retrying in {sleep_for:?}");
            thread::sleep(sleep_for);
        }
    }

    fn lock_with_server_timeout(
        &self,
        conn: &mut PgConnection,
        id: LockId,
        budget: Duration,
    ) -> Result<bool> {
        let Some(setting) = lock_timeout_setting(budget) else {
            return self.try_lock(conn, id);
        };

        conn.batch_execute(&format!("SET lock_timeout = {setting}"))
            .map_err(|err| ConcurrencySafeError::backend(BACKEND_NAME, err))?;

        let outcome = match conn.execute("SELECT pg_advisory_lock($1)", &[&id.value()]) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) => {
                debug!("Advisory lock {id} not granted within lock_timeout={setting}ms");
                Ok(false)
            }
            Err(err) => Err(ConcurrencySafeError::backend(BACKEND_NAME, err)),
        };

        if let Err(err) = conn.batch_execute("RESET lock_timeout") {
            warn!("Failed to reset lock_timeout after waiting for advisory lock {id}: {err}");
            return Err(ConcurrencySafeError::backend(BACKEND_NAME, err));
        }
        outcome
    }
}

impl LockBackend for PostgresAdvisoryBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn acquire(&self, id: LockId, timeout: LockTimeoutValue) -> Result<bool> {
        let started = Instant::now();
        let Some(mut conn) = self.checkout(timeout)? else {
            return Ok(false);
        };

        let outcome = match (timeout, self.strategy) {
            (LockTimeoutValue::Infinite, _) => self.lock_blocking(&mut conn, id).map(|()| true),
            (LockTimeoutValue::Finite(budget), AdvisoryWaitStrategy::Poll { interval }) => {
                let remaining = budget.saturating_sub(started.elapsed());
                self.lock_polling(&mut conn, id, remaining, interval)
            }
            (LockTimeoutValue::Finite(budget), AdvisoryWaitStrategy::Native) => {
                let remaining = budget.saturating_sub(started.elapsed());
                self.lock_with_server_timeout(&mut conn, id, remaining)
            }
        };

        // A failed statement may leave the lock or lock_timeout behind on this session.
        let acquired = match outcome {
            Ok(acquired) => acquired,
            Err(err) => {
                scrub_session(&mut conn, id);
                return Err(err);
            }
        };

        if acquired {
            debug!("Advisory lock {id} granted");
            self.pin(id, conn);
        }
        Ok(acquired)
    }

    /// Unlocks `id` on the session that acquired it.
    ///
    /// Only the thread the lock was granted to can release it; calls from
    /// any other thread are ignored, like an unlock on a foreign session.
    fn release(&self, id: LockId) -> Result<()> {
        let caller = thread::current().id();
        let session = {
            let mut sessions = self.sessions();
            match sessions.get(&id).map(|session| session.owner) {
                None => {
                    trace!("Ignoring release of advisory lock {id}: no session holds it");
                    return Ok(());
                }
                Some(owner) if owner != caller => {
                    debug!(
                        "Ignoring release of advisory lock {id}: held by {owner:?}, not {caller:?}"
                    );
                    return Ok(());
                }
                Some(_) => sessions.remove(&id),
            }
        };
        let Some(PinnedSession { mut conn, .. }) = session else {
            return Ok(());
        };

        match conn.query_one("SELECT pg_advisory_unlock($1)", &[&id.value()]) {
            Ok(row) => {
                if row.get::<_, bool>(0) {
                    debug!("Advisory lock {id} released");
                } else {
                    debug!("Server reported advisory lock {id} was not held by its session");
                }
                Ok(())
            }
            Err(err) => {
                warn!("Failed to release advisory lock {id}: {err}");
                scrub_session(&mut conn, id);
                Err(ConcurrencySafeError::backend(BACKEND_NAME, err))
            }
        }
    }
}

impl Drop for PostgresAdvisoryBackend {
    fn drop(&mut self) {
        for (id, mut session) in self.sessions().drain() {
            warn!("Advisory lock {id} still held when the backend was dropped; unlocking");
            scrub_session(&mut session.conn, id);
        }
    }
}

/// Clears a session whose lock state is uncertain before it goes back to the
/// pool.
///
/// `DISCARD ALL` drops every advisory lock and session setting. If that
/// fails too, the session is terminated on the server, which releases its
/// locks and leaves a closed client that the pool discards.
fn scrub_session(conn: &mut PgConnection, id: LockId) {
    if conn.is_closed() {
        return;
    }

    match conn.batch_execute("DISCARD ALL") {
        Ok(()) => debug!("Reset the session that held advisory lock {id}"),
        Err(err) => {
            warn!("Failed to reset the session holding advisory lock {id}: {err}; terminating it");
            // The server closes the connection mid-statement, so an error is expected.
            if let Err(err) = conn.batch_execute("SELECT pg_terminate_backend(pg_backend_pid())") {
                trace!("Session for advisory lock {id} terminated: {err}");
            }
        }
    }
}

/// Converts a wait budget into a `lock_timeout` value in milliseconds.
///
/// PostgreSQL reads `lock_timeout = 0` as "wait forever", so budgets below
/// one millisecond yield `None` and callers fall back to a single try-lock.
fn lock_timeout_setting(budget: Duration) -> Option<u128> {
    let millis = budget.as_millis();
    if millis == 0 { None } else { Some(millis) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_polls_every_50ms() {
        assert_eq!(
            AdvisoryWaitStrategy::default(),
            AdvisoryWaitStrategy::Poll {
                interval: Duration::from_millis(50)
            }
        );
    }

    #[test]
    fn lock_timeout_setting_uses_milliseconds() {
        assert_eq!(lock_timeout_setting(Duration::from_millis(100)), Some(100));
        assert_eq!(lock_timeout_setting(Duration::from_secs(2)), Some(2000));
    }

    #[test]
    fn sub_millisecond_budget_never_disables_the_timeout() {
        assert_eq!(lock_timeout_setting(Duration::ZERO), None);
        assert_eq!(lock_timeout_setting(Duration::from_micros(900)), None);
    }

    #[test]
    fn connect_rejects_malformed_url() {
        let err = match PostgresAdvisoryBackend::connect(
            "postgresql://localhost:notaport/db",
            1,
            AdvisoryWaitStrategy::default(),
        ) {
            Err(err) => err,
            Ok(_) => panic!("expected an invalid URL to be rejected"),
        };
        assert!(matches!(err, ConcurrencySafeError::InvalidConfig(_)));
    }

    /// Backend over a server nobody listens on; the pool never connects.
    fn unreachable_backend() -> PostgresAdvisoryBackend {
        let config: Config = "host=127.0.0.1 port=1 user=postgres connect_timeout=1"
            .parse()
            .unwrap();
        let pool = Pool::builder()
            .max_size(1)
            .build_unchecked(PostgresConnectionManager::new(config, NoTls));
        PostgresAdvisoryBackend::from_pool(pool, AdvisoryWaitStrategy::default())
    }

    #[test]
    fn bounded_acquire_on_unreachable_server_fails_within_budget() {
        let backend = unreachable_backend();

        let started = Instant::now();
        let err = backend
            .acquire(LockId::from_key("stock:ABC"), LockTimeoutValue::from_millis(100))
            .unwrap_err();

        assert!(matches!(err, ConcurrencySafeError::Backend { backend: "postgres", .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.held_count(), 0);
    }

    #[test]
    #[cfg_attr(not(feature = "integration_tests"), ignore)]
    fn scrubbed_session_returns_to_pool_without_lock_or_settings() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let backend = PostgresAdvisoryBackend::connect(&url, 2, AdvisoryWaitStrategy::Native)
            .unwrap();
        let id = LockId::from_key("scrub:session");

        let mut conn = backend.pool.get().unwrap();
        backend.lock_blocking(&mut conn, id).unwrap();
        conn.batch_execute("SET lock_timeout = 5000").unwrap();

        scrub_session(&mut conn, id);

        let setting: String = conn.query_one("SHOW lock_timeout", &[]).unwrap().get(0);
        assert_eq!(setting, "0");
        drop(conn);

        let mut other = backend.pool.get().unwrap();
        let mut again = backend.pool.get().unwrap();
        assert!(backend.try_lock(&mut other, id).unwrap());
        assert!(!backend.try_lock(&mut again, id).unwrap());
        other
            .query_one("SELECT pg_advisory_unlock($1)", &[&id.value()])
            .unwrap();
    }

    #[test]
    fn release_without_pinned_session_is_a_no_op() {
        let backend = unreachable_backend();
        backend.release(LockId::from_key("stock:ABC")).unwrap();
        assert_eq!(backend.held_count(), 0);
    }
}
