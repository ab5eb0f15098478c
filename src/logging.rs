//! Tracing subscriber setup for embedding applications and tests

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `config.filter`.
///
/// Returns `false` when a global subscriber was already set.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
