//! Structured logging setup
//!
//! The bridge speaks its protocol on stdout, so log output goes to stderr.
//! Verbosity follows `RUST_LOG` and falls back to the given default filter.

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// Returns `false` when a subscriber was already installed, which keeps
/// repeated calls from tests and embedders harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
