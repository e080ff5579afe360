//! Operator-facing tracing setup.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: the bot's log stream, via `RUST_LOG`, output to
//!   stderr with UTC timestamps. Batch progress and the shutdown summary go here.
//!
//! - **Stats file (`io/stats_store`)**: durable per-category counters.
//!   Written regardless of `RUST_LOG`, only controlled by `stats_enabled`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `popbot=info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=popbot=debug popbot run --config popbot.toml
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("popbot=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
