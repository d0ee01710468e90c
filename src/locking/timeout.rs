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

use std::fmt;
use std::time::Duration;

/// Represents the wait budget for a lock acquisition.
///
/// `Infinite` is a distinct mode: backends map it onto their blocking
/// primitive rather than a very long deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeoutValue {
    Finite(Duration),
    Infinite,
}

impl LockTimeoutValue {
    pub const fn from_secs(seconds: u64) -> Self {
        Self::Finite(Duration::from_secs(seconds))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(Duration::from_millis(millis))
    }

    /// Returns the finite budget, or `None` when waiting indefinitely.
    pub fn as_option(&self) -> Option<Duration> {
        match self {
            LockTimeoutValue::Finite(duration) => Some(*duration),
            LockTimeoutValue::Infinite => None,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, LockTimeoutValue::Infinite)
    }
}

impl Default for LockTimeoutValue {
    fn default() -> Self {
        DEFAULT_LOCK_TIMEOUT
    }
}

impl From<Duration> for LockTimeoutValue {
    fn from(duration: Duration) -> Self {
        LockTimeoutValue::Finite(duration)
    }
}

impl From<Option<Duration>> for LockTimeoutValue {
    fn from(duration: Option<Duration>) -> Self {
        match duration {
            Some(duration) => LockTimeoutValue::Finite(duration),
            None => LockTimeoutValue::Infinite,
        }
    }
}

impl fmt::Display for LockTimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeoutValue::Infinite => f.write_str("infinite"),
            LockTimeoutValue::Finite(duration) if duration.subsec_nanos() == 0 => {
                write!(f, "{}s", duration.as_secs())
            }
            LockTimeoutValue::Finite(duration) if duration.subsec_nanos() % 1_000_000 == 0 => {
                write!(f, "{}ms", duration.as_millis())
            }
            LockTimeoutValue::Finite(duration) => {
                // Exact decimal seconds, so the value parses back unchanged.
                let fraction = format!("{:09}", duration.subsec_nanos());
                write!(f, "{}.{}s", duration.as_secs(), fraction.trim_end_matches('0'))
            }
        }
    }
}

/// Wait budget used when neither the caller nor the configuration picks one.
pub const DEFAULT_LOCK_TIMEOUT: LockTimeoutValue = LockTimeoutValue::from_secs(3);

/// Source precedence used when resolving the effective timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Environment,
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: LockTimeoutValue,
    pub source: LockTimeoutSource,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration file",
            LockTimeoutSource::Environment => "environment variable",
            LockTimeoutSource::Cli => "CLI flag",
        };
        f.write_str(label)
    }
}

/// Error produced when parsing a timeout override fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    message: String,
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LockTimeoutParseError {}

impl LockTimeoutParseError {
    fn invalid_value(value: &str) -> Self {
        Self {
            message: format!(
                "Lock timeout value '{value}' is invalid. Use a number of seconds (e.g. '3' or \
                 '0.5'), milliseconds with an 'ms' suffix, or the word 'infinite'."
            ),
        }
    }
}

/// Parses a lock-timeout override value originating from CLI, environment, or configuration.
pub fn parse_timeout_override(value: &str) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("infinite") || trimmed.eq_ignore_ascii_case("none") {
        return Ok(LockTimeoutValue::Infinite);
    }

    if let Some(millis) = trimmed.strip_suffix("ms") {
        return millis
            .trim()
            .parse::<u64>()
            .map(LockTimeoutValue::from_millis)
            .map_err(|_| LockTimeoutParseError::invalid_value(trimmed));
    }

    let seconds = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    if let Ok(whole) = seconds.parse::<u64>() {
        return Ok(LockTimeoutValue::from_secs(whole));
    }

    if let Some(exact) = parse_decimal_seconds(seconds) {
        return Ok(LockTimeoutValue::Finite(exact));
    }

    match seconds.parse::<f64>() {
        Ok(fractional) if fractional >= 0.0 => Duration::try_from_secs_f64(fractional)
            .map(LockTimeoutValue::Finite)
            .map_err(|_| LockTimeoutParseError::invalid_value(trimmed)),
        _ => Err(LockTimeoutParseError::invalid_value(trimmed)),
    }
}

/// Parses `<secs>.<fraction>` with at most nanosecond precision, without
/// going through floating point.
fn parse_decimal_seconds(value: &str) -> Option<Duration> {
    let (whole, fraction) = value.split_once('.')?;
    if whole.is_empty()
        || fraction.is_empty()
        || fraction.len() > 9
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let secs = whole.parse::<u64>().ok()?;
    let nanos = format!("{fraction:0<9}").parse::<u32>().ok()?;
    Some(Duration::new(secs, nanos))
}

/// Resolves the effective timeout value based on CLI > env > config > default precedence.
pub struct LockTimeoutResolver<'a> {
    cli_override: Option<&'a str>,
    env_override: Option<&'a str>,
    config_value: LockTimeoutValue,
    default_value: LockTimeoutValue,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(
        cli_override: Option<&'a str>,
        env_override: Option<&'a str>,
        config_value: LockTimeoutValue,
        default_value: LockTimeoutValue,
    ) -> Self {
        Self {
            cli_override,
            env_override,
            config_value,
            default_value,
        }
    }

    pub fn resolve(self) -> Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(cli_value) = self.cli_override {
            let value = parse_timeout_override(cli_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Cli,
            });
        }

        if let Some(env_value) = self.env_override {
            let value = parse_timeout_override(env_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Environment,
            });
        }

        if self.config_value != self.default_value {
            return Ok(LockTimeoutResolution {
                value: self.config_value,
                source: LockTimeoutSource::Config,
            });
        }

        Ok(LockTimeoutResolution {
            value: self.default_value,
            source: LockTimeoutSource::Default,
        })
    }
}
