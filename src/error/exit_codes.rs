use crate::error::ConcurrencySafeError;

/// Maps an error onto a process exit code following `sysexits.h` where one fits.
pub fn get_exit_code(error: &ConcurrencySafeError) -> i32 {
    match error {
        ConcurrencySafeError::KeyTemplate(_)
        | ConcurrencySafeError::ConfigError(_)
        | ConcurrencySafeError::InvalidConfig(_) => 2,

        ConcurrencySafeError::Backend { .. } => 69, // EX_UNAVAILABLE

        ConcurrencySafeError::LockAcquireTimeout { .. } => 75, // EX_TEMPFAIL

        ConcurrencySafeError::Io(_) => 1,
    }
}
