//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when set.

use interbank_types::{InterbankError, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::LogConfig;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| InterbankError::Configuration(format!("invalid log level: {e}")))?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.use_json {
        registry
            .with(fmt::layer().json().with_target(true).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_ansi(true))
            .try_init()
    };
    installed.map_err(|e| InterbankError::Configuration(format!("logging already initialised: {e}")))
}
