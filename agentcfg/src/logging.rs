//! Development-time tracing for debugging agentcfg.
//!
//! Tracing goes to stderr. Stdout is reserved for the dry-run preview and the
//! terse success lines printed by the CLI.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `warn`, or `agentcfg=debug` when
/// `verbose` is set.
///
/// # Example
/// ```bash
/// RUST_LOG=agentcfg=trace agentcfg configure codex --dry-run
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "agentcfg=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
