//! Request telemetry
//!
//! Counts, times and tracks in-flight HTTP requests into the metrics registry.

pub mod fault;
pub mod middleware;
pub mod policy;
pub mod recorder;

pub use fault::{Fault, FaultStatus};
pub use middleware::{monitor_route, track_requests, MonitorRoute, MonitorRouteLayer};
pub use policy::{should_skip, RouteMonitoring};
pub use recorder::{
    method_label, CompletedRequest, RequestInstruments, RequestOutcome, RequestTimings, TelemetryRecorder,
    CLIENT_CLOSED_REQUEST, REQUEST_LABELS,
};
