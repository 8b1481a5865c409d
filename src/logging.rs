// src/logging.rs

//! Logging setup for `workdag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. explicit filter string passed by the embedding process (if provided)
//! 2. `WORKDAG_LOG` environment variable (e.g. "info", "workdag=debug")
//! 3. default to `info`

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup; calling it twice panics, so embedding
/// processes that install their own subscriber should simply not call this.
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(f) => EnvFilter::try_new(f)?,
        None => EnvFilter::try_from_env("WORKDAG_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}
