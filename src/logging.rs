/// Returns the default `env_logger` filter for a verbosity level.
pub fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "concurrency_safe=warn",
        1 => "concurrency_safe=info",
        2 => "concurrency_safe=debug",
        _ => "concurrency_safe=trace",
    }
}

/// Initialize the logger with the specified verbosity level
///
/// # Arguments
/// * `verbose` - Verbosity level (0=warn, 1=info, 2=debug, 3+=trace)
///
/// `RUST_LOG` takes precedence when set. Lock waits are timing sensitive, so
/// records carry millisecond timestamps.
pub fn setup_logger(verbose: u8) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(verbose)),
    )
    .format_timestamp_millis()
    .format_module_path(false)
    .format_target(false)
    .try_init();
}
