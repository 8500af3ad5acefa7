//! Observability plumbing: metrics registry, process metrics and logging setup.

/// Injected Prometheus registry and typed instrument families
pub mod metrics;

/// Default process metrics sampled on scrape
pub mod process;

/// Global `tracing` subscriber setup
pub mod logging;

pub use logging::{init_logging, LoggingConfig};
pub use metrics::{MetricKind, MetricsRegistry, MetricsRegistryBuilder, CONTENT_TYPE};
pub use process::{DefaultMetricsOptions, ProcessCollector};
