//! Logging setup
//!
//! Installs a global `tracing` subscriber. Library code only emits events; the
//! host decides whether to call [`init_logging`] or to bring its own subscriber.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter string, compatible with `tracing_subscriber::EnvFilter`.
    /// Example: "info,health_telemetry=debug"
    pub filter: String,
    /// Emit one JSON object per event instead of human readable lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,health_telemetry=info".to_string(),
            json: false,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.filter` when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| Error::config(format!("invalid log filter '{}': {}", config.filter, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::config(format!("failed to initialize global tracing subscriber: {e}")))
}
