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

mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning a key template into a concrete lock key.
///
/// These indicate a programming error in the protected operation's
/// declaration and are never subject to a conflict policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyTemplateError {
    #[error(
        "key template references '{name}', but it is not present in the operation arguments. \
         Available: {available:?}"
    )]
    MissingArgument {
        name: String,
        available: Vec<String>,
    },

    #[error("key template '{template}' is malformed: {details}")]
    Malformed { template: String, details: String },
}

/// Base error for everything raised by this crate.
#[derive(Error, Debug)]
pub enum ConcurrencySafeError {
    #[error("Failed to acquire lock for key='{key}' within timeout={}s", .timeout.as_secs_f64())]
    LockAcquireTimeout { key: String, timeout: Duration },

    #[error(transparent)]
    KeyTemplate(#[from] KeyTemplateError),

    #[error("Lock backend '{backend}' failed: {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConcurrencySafeError {
    /// Stable identifier for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ConcurrencySafeError::LockAcquireTimeout { .. } => "lock_acquire_timeout",
            ConcurrencySafeError::KeyTemplate(_) => "key_template_error",
            ConcurrencySafeError::Backend { .. } => "backend_error",
            ConcurrencySafeError::ConfigError(_) | ConcurrencySafeError::InvalidConfig(_) => {
                "config_error"
            }
            ConcurrencySafeError::Io(_) => "concurrency_safe_error",
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, ConcurrencySafeError::LockAcquireTimeout { .. })
    }

    pub(crate) fn backend(backend: &'static str, details: impl ToString) -> Self {
        ConcurrencySafeError::Backend {
            backend,
            details: details.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConcurrencySafeError>;
