use thiserror::Error;

/// Crate result type, wrapping the crate's [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or registering the health plugin.
///
/// Runtime failures never surface here: probe failures are folded into the
/// probe report and request telemetry has no failure path.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid plugin options (bad status code, malformed route, empty metric name...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// An endpoint references an authentication strategy the host never registered.
    #[error("Unknown authentication strategy '{name}' for the {endpoint} endpoint")]
    UnknownAuthStrategy {
        /// Strategy name found in the options
        name: String,
        /// Endpoint that asked for it
        endpoint: String,
    },

    /// The Prometheus recorder rejected its bucket or quantile layout.
    #[error("Metrics recorder build error: {0}")]
    MetricsBuild(#[from] metrics_exporter_prometheus::BuildError),

    /// A metric could not be registered in the registry (name collision, wrong kind...).
    #[error("Metrics registration error: {0}")]
    Metrics(String),

    /// Errors related to standard I/O operations (e.g. reading an options file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Options file is not valid JSON for [`crate::HealthOptions`].
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a Metrics error.
    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }
}
