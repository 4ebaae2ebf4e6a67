//! Tracing subscriber setup shared by the binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ConfigError, ConfigResult};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging(default_level: &str) -> ConfigResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| ConfigError::invalid_field("daemon.log_level", e.to_string()))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init()
        .map_err(|e| ConfigError::invalid_field("logging", format!("Failed to set logger: {e}")))
}
