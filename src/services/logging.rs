//! Tracing subscriber setup.
//!
//! One subscriber is installed at start-up: an [EnvFilter] read from
//! `RUST_LOG` (falling back to [DEFAULT_DIRECTIVES]) and a `fmt` layer that
//! writes either JSON lines or the compact human format.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVES: &str = "library_scanner=info,telemetry=info";

/// Build the filter from `RUST_LOG`, or the defaults when that is missing.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(json: bool) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    if json {
        registry
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install JSON tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }
    Ok(())
}
