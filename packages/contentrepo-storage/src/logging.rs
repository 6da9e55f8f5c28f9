//! Tracing setup for binaries and tests

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{ErrorKind, Result, StorageError};

/// `RUST_LOG` when set and valid, otherwise the configured directives.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        StorageError::new(
            ErrorKind::Config,
            format!("Invalid logging filter '{}': {}", config.filter, e),
        )
        .with_source(e)
    })
}

/// Install the global fmt subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| StorageError::config(format!("Failed to install subscriber: {}", e)))
}
