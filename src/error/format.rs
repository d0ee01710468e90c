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

use crate::error::{ConcurrencySafeError, ErrorContext, KeyTemplateError};
use crate::locking::{LockTimeoutValue, to_lock_id};

pub fn format_error_chain(error: &ConcurrencySafeError) -> String {
    let context = ErrorContext::new(error);
    context.to_string()
}

/// Labelled values that identify what an error is about.
fn error_facts(error: &ConcurrencySafeError) -> Vec<(&'static str, String)> {
    match error {
        ConcurrencySafeError::LockAcquireTimeout { key, timeout } => vec![
            ("key", key.clone()),
            ("lock id", to_lock_id(key).to_string()),
            ("waited", LockTimeoutValue::Finite(*timeout).to_string()),
        ],
        ConcurrencySafeError::KeyTemplate(KeyTemplateError::MissingArgument { name, .. }) => {
            vec![("placeholder", format!("{{{name}}}"))]
        }
        ConcurrencySafeError::Backend { backend, .. } => vec![("backend", backend.to_string())],
        ConcurrencySafeError::KeyTemplate(KeyTemplateError::Malformed { .. })
        | ConcurrencySafeError::ConfigError(_)
        | ConcurrencySafeError::InvalidConfig(_)
        | ConcurrencySafeError::Io(_) => Vec::new(),
    }
}

/// Format error for display on a terminal, optionally with ANSI colors
///
/// The header carries the stable error code, followed by the key, lock id
/// or backend the error concerns.
pub fn format_error_with_color(error: &ConcurrencySafeError, use_color: bool) -> String {
    let red = if use_color { "\x1b[31m" } else { "" };
    let yellow = if use_color { "\x1b[33m" } else { "" };
    let cyan = if use_color { "\x1b[36m" } else { "" };
    let dim = if use_color { "\x1b[2m" } else { "" };
    let reset = if use_color { "\x1b[0m" } else { "" };
    let bold = if use_color { "\x1b[1m" } else { "" };

    let context = ErrorContext::new(error);
    let mut output = format!(
        "{red}{bold}Error:{reset} {error} {dim}[{}]{reset}\n",
        error.code()
    );

    let facts = error_facts(error);
    if !facts.is_empty() {
        output.push('\n');
        let width = facts.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in &facts {
            output.push_str(&format!("  {bold}{label:<width$}{reset}  {value}\n"));
        }
    }

    if let Some(details) = &context.details {
        output.push_str(&format!("\n{details}\n"));
    }

    if let Some(suggestion) = &context.suggestion {
        output.push_str(&format!("\n{yellow}{bold}Suggestions:{reset}\n"));
        for line in suggestion.lines().filter(|line| !line.trim().is_empty()) {
            output.push_str(&format!("{cyan}• {}{reset}\n", line.trim()));
        }
    }

    if use_color {
        output.push_str(reset);
    }

    output
}
