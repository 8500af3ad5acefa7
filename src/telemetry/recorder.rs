//! Request telemetry recorder
//!
//! Two entry points, called by the host integration for every request:
//! [`TelemetryRecorder::on_request_start`] and
//! [`TelemetryRecorder::on_request_complete`].

use super::policy::{should_skip, RouteMonitoring};
use crate::config::MetricNames;
use crate::error::Result;
use crate::observability::metrics::{CounterVec, GaugeVec, HistogramVec, MetricsRegistry, SummaryVec};
use axum::http::{Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Label names shared by the counter, summary and histogram.
pub const REQUEST_LABELS: &[&str] = &["method", "status_code", "path"];

/// Status recorded for requests abandoned by the client before a response existed.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Timestamps of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimings {
    /// Request received
    pub received: Instant,
    /// Response produced by the handler
    pub responded: Instant,
    /// Response fully sent, when known
    pub completed: Option<Instant>,
}

impl RequestTimings {
    /// Time from reception to completion, or to the response when completion
    /// was not observed.
    pub fn duration(&self) -> Duration {
        self.completed
            .unwrap_or(self.responded)
            .saturating_duration_since(self.received)
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A regular response carrying its own status
    Response(StatusCode),
    /// A fault mapped to an HTTP status
    Fault(StatusCode),
}

impl RequestOutcome {
    /// Fault used when the client went away before the handler answered.
    pub fn client_closed() -> Self {
        Self::Fault(StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST))
    }

    /// Status used for the `status_code` label.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Response(status) | Self::Fault(status) => *status,
        }
    }
}

/// Everything the recorder needs to know about a finished request.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    /// Request method
    pub method: Method,
    /// Template of the matched route, if any route matched
    pub route_path: Option<String>,
    /// Concrete request path
    pub path: String,
    /// Monitoring flag of the matched route
    pub monitoring: RouteMonitoring,
    /// Response or fault
    pub outcome: RequestOutcome,
    /// Request timestamps
    pub timings: RequestTimings,
}

impl CompletedRequest {
    /// Value of the `path` label: the route template, or the concrete path for
    /// unmatched requests and root catch-all routes.
    pub fn label_path(&self) -> &str {
        match self.route_path.as_deref() {
            Some(template) if !is_root_catch_all(template) => template,
            _ => &self.path,
        }
    }
}

fn is_root_catch_all(template: &str) -> bool {
    let Some(rest) = template.strip_prefix('/') else {
        return false;
    };
    let wildcard = rest.starts_with('*') || (rest.starts_with("{*") && rest.ends_with('}'));
    wildcard && !rest.contains('/')
}

/// Lowercase method name used as the `method` label.
pub fn method_label(method: &Method) -> String {
    method.as_str().to_ascii_lowercase()
}

/// The four request instruments.
#[derive(Clone)]
pub struct RequestInstruments {
    requests: CounterVec,
    duration_ms: SummaryVec,
    duration_seconds: HistogramVec,
    current_requests: GaugeVec,
}

impl RequestInstruments {
    /// Register the instruments in `registry` under `names`.
    ///
    /// The histogram name must have a bucket layout in `registry`.
    pub fn register(registry: &Arc<MetricsRegistry>, names: &MetricNames) -> Result<Self> {
        Ok(Self {
            requests: registry.register_counter(
                &names.request_counter,
                "Total number of http requests",
                REQUEST_LABELS,
            )?,
            duration_ms: registry.register_summary(
                &names.request_summary,
                "Duration of http requests",
                REQUEST_LABELS,
            )?,
            duration_seconds: registry.register_histogram(
                &names.request_duration_histogram,
                "Duration of http requests",
                REQUEST_LABELS,
            )?,
            current_requests: registry.register_gauge(
                &names.current_requests,
                "Number of requests currently running",
                &["method"],
            )?,
        })
    }
}

/// Updates the request instruments on request lifecycle events.
pub struct TelemetryRecorder {
    instruments: RequestInstruments,
    monitor_all_by_default: bool,
    in_flight: Mutex<HashMap<String, u64>>,
}

impl TelemetryRecorder {
    /// Create a recorder over registered instruments.
    pub fn new(instruments: RequestInstruments, monitor_all_by_default: bool) -> Self {
        Self {
            instruments,
            monitor_all_by_default,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// A request was received. Counts it as in flight whatever its route.
    pub fn on_request_start(&self, method: &Method) {
        let method = method_label(method);
        let mut in_flight = self.in_flight.lock();
        let open = in_flight.entry(method.clone()).or_insert(0);
        *open += 1;
        self.instruments
            .current_requests
            .with_labels(&[method.as_str()])
            .set(*open as f64);
    }

    /// A request finished.
    ///
    /// Always releases the in-flight slot; the counter, summary and histogram are
    /// only updated when the monitoring policy keeps the route. A completion
    /// without a matching start leaves the gauge untouched.
    pub fn on_request_complete(&self, request: &CompletedRequest) {
        let method = method_label(&request.method);
        {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get_mut(&method) {
                Some(open) if *open > 0 => {
                    *open -= 1;
                    self.instruments
                        .current_requests
                        .with_labels(&[method.as_str()])
                        .set(*open as f64);
                }
                _ => warn!(
                    method = %method,
                    path = %request.path,
                    "Request completed without a matching start, in-flight gauge left unchanged"
                ),
            }
        }

        if should_skip(self.monitor_all_by_default, request.monitoring) {
            trace!(method = %method, path = %request.path, "Route not monitored");
            return;
        }

        let status = request.outcome.status_code().as_u16().to_string();
        let labels = [method.as_str(), status.as_str(), request.label_path()];
        let duration = request.timings.duration();

        self.instruments.requests.with_labels(&labels).increment(1);
        self.instruments
            .duration_ms
            .with_labels(&labels)
            .record(duration.as_secs_f64() * 1000.0);
        self.instruments
            .duration_seconds
            .with_labels(&labels)
            .record(duration.as_secs_f64());
    }

    /// Requests with `method` currently in flight.
    pub fn in_flight(&self, method: &Method) -> u64 {
        self.in_flight
            .lock()
            .get(&method_label(method))
            .copied()
            .unwrap_or(0)
    }
}
