//! Diagnostic tracing for the CLI and the server.
//!
//! Output goes to stderr and is filtered by `RUST_LOG`. Run checkpoints are the
//! product record of a run; nothing here is persisted.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when unset or invalid.
///
/// # Example
/// ```bash
/// RUST_LOG=agentloop=debug agentloop run "What is 2+2?"
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
