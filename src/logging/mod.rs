//! Diagnostics: `tracing` to stderr, plus the optional NDJSON relay-event mirror.

pub mod ndjson;

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Filtering follows `RUST_LOG` and defaults to `warn`.
///
/// Fails if a subscriber is already installed.
pub fn init() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow!("initialize tracing: {e}"))
}
