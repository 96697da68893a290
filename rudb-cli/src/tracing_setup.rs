//! Tracing setup for the rudb CLI
//!
//! Usage:
//!   rudb --debug ...                 # Debug logging, including every SQL statement
//!   RUST_LOG=rudb::query=info rudb   # Fine-grained log control
//!
//! Logs go to stderr so query output on stdout stays machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Enable debug logging (sets RUST_LOG=debug if not already set)
    pub debug: bool,
}

pub fn init(config: &TracingConfig) -> Result<()> {
    // rudb::query only fires when the database config enables debug
    let default_level = if config.debug { "debug" } else { "warn,rudb::query=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
