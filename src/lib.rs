//! Health Telemetry
//!
//! Liveness and readiness probes, Prometheus request metrics and optional
//! endpoint authentication for axum applications, packaged as a plugin that
//! attaches to an existing [`axum::Router`].

// Strict linting configuration
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(unused_imports)]
#![warn(unused_variables)]
#![warn(dead_code)]

/// Endpoint authentication strategies
pub mod auth;
/// Plugin options
pub mod config;
/// Error types and error handling utilities
pub mod error;
/// Plugin wiring the endpoints and the telemetry layer into a router
pub mod http_server;
/// Metrics registry, process metrics and logging setup
pub mod observability;
/// Probe sets and their evaluation
pub mod probes;
/// Request telemetry recorder and its axum integration
pub mod telemetry;

pub use auth::{AuthRejection, AuthStrategies, AuthStrategy, BasicAuth};
pub use config::{AuthConfig, AuthSetting, Endpoint, HealthOptions, MetricNames};
pub use error::{Error, Result};
pub use http_server::HealthPlugin;
pub use observability::{init_logging, LoggingConfig, MetricsRegistry};
pub use probes::{run_probes, Probe, ProbeOutcome, ProbeReport, ProbeSet};
pub use telemetry::{monitor_route, Fault, RouteMonitoring};

/// The current version of the crate, sourced from the `Cargo.toml` file at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
