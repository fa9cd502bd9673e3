#![forbid(unsafe_code)]

//! Logging init: structured `tracing` output on stderr.

use tracing_subscriber::EnvFilter;

/// Builds the filter used by [`init_logging`]. `RUST_LOG` wins when set,
/// otherwise the configured level applies to everything.
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Safe to call once per process; later calls
/// are ignored so tests and the binary can share the same entry point.
pub fn init_logging(default_level: &str) {
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();

    if initialized.is_ok() {
        tracing::debug!(level = default_level, "logging initialized");
    }
}
