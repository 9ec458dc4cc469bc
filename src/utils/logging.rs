//! Logging subscriber setup.
//!
//! Both the proxy and the worker log to stderr. For the worker that stream is
//! forwarded to the SSH client, so its output is visible to the remote user.

use crate::config::{LogMode, LoggingConfig};
use crate::error::{RelayError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.mode {
        LogMode::Development => builder.with_target(true).try_init(),
        LogMode::Production => builder.json().with_current_span(true).try_init(),
    };

    installed.map_err(|e| RelayError::ConfigError(format!("Failed to install logger: {e}")))
}
