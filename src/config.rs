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

use crate::error::{ConcurrencySafeError, Result};
use crate::locking::{
    AdvisoryWaitStrategy, DEFAULT_LOCK_TIMEOUT, InMemoryLockBackend, LockBackend,
    LockCoordinator, LockTimeoutResolution, LockTimeoutResolver, LockTimeoutValue,
    PostgresAdvisoryBackend, parse_timeout_override,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "concurrency-safe.toml";
pub const LOCK_TIMEOUT_ENV: &str = "CONCURRENCY_SAFE_LOCK_TIMEOUT";
pub const DATABASE_URL_ENV: &str = "CONCURRENCY_SAFE_DATABASE_URL";
const FALLBACK_DATABASE_URL_ENV: &str = "DATABASE_URL";

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConcurrencySafeConfig {
    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Seconds, fractional seconds, `<n>ms`, or `infinite`.
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

impl LockingConfig {
    pub fn timeout_value(&self) -> Result<LockTimeoutValue> {
        parse_timeout_override(&self.timeout).map_err(|err| {
            ConcurrencySafeError::InvalidConfig(format!("locking.timeout: {err}"))
        })
    }

    pub fn set_timeout_value(&mut self, value: LockTimeoutValue) {
        self.timeout = value.to_string();
    }
}

fn default_timeout() -> String {
    DEFAULT_LOCK_TIMEOUT.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategyKind {
    #[default]
    Poll,
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Maximum number of locks held at once through the PostgreSQL backend.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default)]
    pub wait_strategy: WaitStrategyKind,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: None,
            pool_size: DEFAULT_POOL_SIZE,
            wait_strategy: WaitStrategyKind::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl BackendConfig {
    pub fn wait_strategy(&self) -> AdvisoryWaitStrategy {
        match self.wait_strategy {
            WaitStrategyKind::Poll => AdvisoryWaitStrategy::Poll {
                interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            },
            WaitStrategyKind::Native => AdvisoryWaitStrategy::Native,
        }
    }

    /// Database URL with environment overrides applied.
    pub fn database_url(&self) -> Option<String> {
        env::var(DATABASE_URL_ENV)
            .ok()
            .or_else(|| env::var(FALLBACK_DATABASE_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.url.clone())
    }
}

impl ConcurrencySafeConfig {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            debug!("Config file not found at {config_path:?}, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)?;
        let config: ConcurrencySafeConfig = toml::from_str(&contents).map_err(|e| {
            ConcurrencySafeError::ConfigError(format!("Failed to parse {CONFIG_FILE_NAME}: {e}"))
        })?;

        // Surface a bad timeout at load time rather than at first lock.
        config.locking.timeout_value()?;

        debug!("Loaded config from {config_path:?}");
        Ok(config)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(config_dir)?;

        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConcurrencySafeError::ConfigError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&config_path, contents)?;
        debug!("Saved config to {config_path:?}");
        Ok(())
    }

    /// Resolves the wait budget with CLI > environment > file > default precedence.
    pub fn resolve_timeout(&self, cli_override: Option<&str>) -> Result<LockTimeoutResolution> {
        let env_override = env::var(LOCK_TIMEOUT_ENV).ok();
        self.resolve_timeout_with(cli_override, env_override.as_deref())
    }

    pub fn resolve_timeout_with(
        &self,
        cli_override: Option<&str>,
        env_override: Option<&str>,
    ) -> Result<LockTimeoutResolution> {
        let config_value = self.locking.timeout_value()?;
        LockTimeoutResolver::new(cli_override, env_override, config_value, DEFAULT_LOCK_TIMEOUT)
            .resolve()
            .map_err(|err| ConcurrencySafeError::InvalidConfig(err.to_string()))
    }

    pub fn build_backend(&self) -> Result<Arc<dyn LockBackend>> {
        match self.backend.kind {
            BackendKind::Memory => {
                info!("Using in-process lock backend");
                Ok(Arc::new(InMemoryLockBackend::new()))
            }
            BackendKind::Postgres => {
                let url = self.backend.database_url().ok_or_else(|| {
                    ConcurrencySafeError::InvalidConfig(format!(
                        "backend.kind = \"postgres\" requires backend.url, {DATABASE_URL_ENV} or \
                         {FALLBACK_DATABASE_URL_ENV}"
                    ))
                })?;
                let backend = PostgresAdvisoryBackend::connect(
                    &url,
                    self.backend.pool_size,
                    self.backend.wait_strategy(),
                )?;
                Ok(Arc::new(backend))
            }
        }
    }

    pub fn build_coordinator(&self, cli_timeout: Option<&str>) -> Result<LockCoordinator> {
        let resolution = self.resolve_timeout(cli_timeout)?;
        debug!(
            "Default lock timeout {} (from {})",
            resolution.value, resolution.source
        );
        Ok(LockCoordinator::new(self.build_backend()?, resolution.value))
    }
}
