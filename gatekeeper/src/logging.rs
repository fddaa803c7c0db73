//! Diagnostic tracing for the gatekeeper binary.
//!
//! Admission decisions, retries, aborts and soft checkpoints are emitted as
//! `tracing` events from the library. This module only installs the
//! subscriber; library users bring their own.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so stdout stays machine-readable.
///
/// # Example
/// ```bash
/// RUST_LOG=gatekeeper=debug gatekeeper replay events.jsonl
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
