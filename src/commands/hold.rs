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

use crate::config::ConcurrencySafeConfig;
use crate::error::{ConcurrencySafeError, Result};
use crate::locking::{LockCoordinator, LockTimeoutValue, parse_timeout_override};
use log::info;
use std::thread;
use std::time::Duration;

/// Acquires a key, keeps it for a while and releases it.
///
/// With `backend.kind = "postgres"` a second `hold` on the same key, from
/// another process, blocks until this one lets go. The default in-memory
/// backend only coordinates threads inside a single process.
pub struct HoldCommand {
    coordinator: LockCoordinator,
}

impl HoldCommand {
    pub fn new(config: &ConcurrencySafeConfig, lock_timeout: Option<&str>) -> Result<Self> {
        Ok(Self {
            coordinator: config.build_coordinator(lock_timeout)?,
        })
    }

    pub fn from_coordinator(coordinator: LockCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn execute(&self, key: &str, hold_for: &str) -> Result<()> {
        let hold_for = parse_hold_duration(hold_for)?;

        let guard = self
            .coordinator
            .lock(key, self.coordinator.default_timeout())?;
        println!("Acquired '{key}' (id {})", guard.id());
        info!("Holding '{key}' for {:.3}s", hold_for.as_secs_f64());

        thread::sleep(hold_for);

        let held = guard.held_for();
        guard.release()?;
        println!("Released '{key}' after {:.3}s", held.as_secs_f64());
        Ok(())
    }
}

fn parse_hold_duration(value: &str) -> Result<Duration> {
    match parse_timeout_override(value) {
        Ok(LockTimeoutValue::Finite(duration)) => Ok(duration),
        Ok(LockTimeoutValue::Infinite) => Err(ConcurrencySafeError::InvalidConfig(
            "--for needs a finite duration".to_string(),
        )),
        Err(err) => Err(ConcurrencySafeError::InvalidConfig(err.to_string())),
    }
}
