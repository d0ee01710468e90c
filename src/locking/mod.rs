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

//! Business-key locking on top of an external advisory lock service.

pub mod backend;
pub mod coordinator;
pub mod guarded;
pub mod hashing;
pub mod key;
pub mod memory;
pub mod postgres;
pub mod timeout;

pub use backend::LockBackend;
pub use coordinator::{LockCoordinator, LockGuard, lock, with_lock};
pub use guarded::{ConcurrencySafe, ConcurrencySafeBuilder, ConflictPolicy};
pub use hashing::{LockId, to_lock_id};
pub use key::{KeyArgs, KeyTemplate};
pub use memory::InMemoryLockBackend;
pub use postgres::{AdvisoryWaitStrategy, PostgresAdvisoryBackend};
pub use timeout::{
    DEFAULT_LOCK_TIMEOUT, LockTimeoutResolution, LockTimeoutResolver, LockTimeoutSource,
    LockTimeoutValue, parse_timeout_override,
};
