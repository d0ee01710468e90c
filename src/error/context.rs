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

use crate::error::{ConcurrencySafeError, KeyTemplateError};
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a ConcurrencySafeError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a ConcurrencySafeError) -> Self {
        let (suggestion, details) = match error {
            ConcurrencySafeError::LockAcquireTimeout { key, timeout } => {
                let suggestion = Some(
                    "Another worker is holding this key. Retry later, or raise the wait budget \
                     with --lock-timeout or CONCURRENCY_SAFE_LOCK_TIMEOUT."
                        .to_string(),
                );
                let details = Some(format!(
                    "Waited {:.3}s for key '{key}' without being granted the lock.",
                    timeout.as_secs_f64()
                ));
                (suggestion, details)
            }
            ConcurrencySafeError::KeyTemplate(KeyTemplateError::MissingArgument {
                name,
                available,
            }) => {
                let suggestion = Some(format!(
                    "Check the placeholder '{{{name}}}' for typos, or give it a default value \
                     with KeyTemplate::with_default."
                ));
                let details = Some(format!("Available arguments: {}", available.join(", ")));
                (suggestion, details)
            }
            ConcurrencySafeError::KeyTemplate(KeyTemplateError::Malformed { template, .. }) => {
                let suggestion = Some(
                    "Placeholders look like '{name}'; write '{{' or '}}' for literal braces."
                        .to_string(),
                );
                let details = Some(format!("Template: {template}"));
                (suggestion, details)
            }
            ConcurrencySafeError::Backend { backend, details } => {
                let suggestion = if *backend == "postgres" {
                    Some(
                        "Verify that the database is reachable and that DATABASE_URL points to \
                         a PostgreSQL server."
                            .to_string(),
                    )
                } else {
                    None
                };
                (suggestion, Some(details.clone()))
            }
            ConcurrencySafeError::ConfigError(msg) | ConcurrencySafeError::InvalidConfig(msg) => {
                let suggestion = Some(
                    "Check concurrency-safe.toml and the CONCURRENCY_SAFE_* environment \
                     variables."
                        .to_string(),
                );
                (suggestion, Some(msg.clone()))
            }
            ConcurrencySafeError::Io(_) => (None, None),
        };

        Self {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }
}

impl fmt::Display for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
