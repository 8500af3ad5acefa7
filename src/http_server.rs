//! Health plugin for axum routers
//!
//! Registers on a host router:
//! - the liveness endpoint (`/liveness` by default)
//! - the readiness endpoint (`/readiness` by default)
//! - the Prometheus metrics endpoint (`/metrics` by default)
//!
//! and, when metrics are exposed, request telemetry over every route of the router.

use crate::auth::{require_auth, AuthStrategies};
use crate::config::{Endpoint, HealthOptions};
use crate::error::Result;
use crate::observability::metrics::{MetricsRegistry, DEFAULT_BUCKETS};
use crate::observability::ProcessCollector;
use crate::probes::{run_probes, ProbeSet, SUCCESS_TEXT};
use crate::telemetry::{monitor_route, track_requests, RequestInstruments, TelemetryRecorder};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{debug, info};

/// Liveness, readiness and metrics endpoints plus request telemetry.
///
/// ```ignore
/// let app = Router::new().route("/", get(index));
/// let app = HealthPlugin::new(HealthOptions::default())
///     .readiness_probes(ProbeSet::new().with_fn("db", check_db))
///     .register(app)?;
/// ```
///
/// Routes added to the router after [`HealthPlugin::register`] are not measured.
pub struct HealthPlugin {
    options: HealthOptions,
    liveness: ProbeSet,
    readiness: ProbeSet,
    registry: Option<Arc<MetricsRegistry>>,
    strategies: AuthStrategies,
}

impl HealthPlugin {
    /// Plugin with the default `status` probe on both probe endpoints.
    pub fn new(options: HealthOptions) -> Self {
        Self {
            options,
            liveness: ProbeSet::default_status(),
            readiness: ProbeSet::default_status(),
            registry: None,
            strategies: AuthStrategies::default(),
        }
    }

    /// Probes answered by the liveness endpoint.
    pub fn liveness_probes(mut self, probes: ProbeSet) -> Self {
        self.liveness = probes;
        self
    }

    /// Probes answered by the readiness endpoint.
    pub fn readiness_probes(mut self, probes: ProbeSet) -> Self {
        self.readiness = probes;
        self
    }

    /// Registry receiving the request instruments, instead of a private one.
    ///
    /// The registry must declare a bucket layout for the configured histogram name.
    pub fn registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Strategies the `auth` option can refer to.
    pub fn auth_strategies(mut self, strategies: AuthStrategies) -> Self {
        self.strategies = strategies;
        self
    }

    /// Attach the endpoints and the telemetry layer to `router`.
    ///
    /// Fails on invalid options, unknown authentication strategies and metric
    /// name collisions in the registry.
    pub fn register<S>(self, router: Router<S>) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.options.validate()?;
        let success = self.options.success_status()?;
        let error = self.options.error_status()?;
        let mut router = router;

        let recorder = if self.options.expose_metrics {
            let registry = match &self.registry {
                Some(registry) => registry.clone(),
                None => Arc::new(
                    MetricsRegistry::builder()
                        .histogram(self.options.metrics_name.request_duration_histogram.clone(), DEFAULT_BUCKETS)
                        .build()?,
                ),
            };
            let instruments = RequestInstruments::register(&registry, &self.options.metrics_name)?;
            registry.spawn_upkeep();
            let collector = if self.options.collect_default_metrics {
                Some(Arc::new(ProcessCollector::register(
                    &registry,
                    &self.options.default_metrics_options,
                )?))
            } else {
                None
            };

            let handler = get(move || {
                let registry = registry.clone();
                let collector = collector.clone();
                async move {
                    if let Some(collector) = collector {
                        collector.collect_off_runtime().await;
                    }
                    ([(header::CONTENT_TYPE, registry.content_type())], registry.render())
                }
            });
            router = router.route(&self.options.metrics_route, self.guard(Endpoint::Metrics, handler)?);

            Some(Arc::new(TelemetryRecorder::new(
                instruments,
                self.options.monitor_all_routes_by_default,
            )))
        } else {
            None
        };

        for (endpoint, probes) in [
            (Endpoint::Liveness, &self.liveness),
            (Endpoint::Readiness, &self.readiness),
        ] {
            if !self.options.is_exposed(endpoint) {
                continue;
            }
            let probes = probes.clone();
            let handler = get(move || {
                let probes = probes.clone();
                async move { probe_response(&probes, success, error).await }
            });
            router = router.route(self.options.route(endpoint), self.guard(endpoint, handler)?);
        }

        info!(
            liveness = self.options.expose_liveness.then_some(self.options.liveness_route.as_str()),
            readiness = self.options.expose_readiness.then_some(self.options.readiness_route.as_str()),
            metrics = self.options.expose_metrics.then_some(self.options.metrics_route.as_str()),
            "Health endpoints registered"
        );

        Ok(match recorder {
            Some(recorder) => router.layer(from_fn_with_state(recorder, track_requests)),
            None => router,
        })
    }

    fn guard<S>(&self, endpoint: Endpoint, handler: MethodRouter<S>) -> Result<MethodRouter<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        let setting = self.options.auth.for_endpoint(endpoint);
        let handler = match self.strategies.resolve(&setting, endpoint)? {
            Some(strategy) => {
                debug!(endpoint = %endpoint, setting = ?setting, "Endpoint requires authentication");
                handler.route_layer(from_fn_with_state(strategy, require_auth))
            }
            None => handler,
        };
        Ok(handler.layer(monitor_route(self.options.monitor_probes)))
    }
}

async fn probe_response(probes: &ProbeSet, success: StatusCode, error: StatusCode) -> Response {
    if probes.is_empty() {
        return (StatusCode::OK, SUCCESS_TEXT).into_response();
    }
    let report = run_probes(probes, success, error).await;
    (report.status_code(), Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, AuthSetting};
    use crate::error::Error;
    use axum::body::Body;
    use axum::extract::Request;
    use tower::ServiceExt;

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_default_endpoints_are_registered() {
        let app = HealthPlugin::new(HealthOptions::default())
            .register(Router::new())
            .unwrap();

        assert_eq!(get_status(app.clone(), "/liveness").await, StatusCode::OK);
        assert_eq!(get_status(app.clone(), "/readiness").await, StatusCode::OK);
        assert_eq!(get_status(app, "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_registration_starts_registry_upkeep() {
        let registry = Arc::new(
            MetricsRegistry::builder()
                .histogram("http_request_duration_seconds", DEFAULT_BUCKETS)
                .build()
                .unwrap(),
        );
        let app = HealthPlugin::new(HealthOptions::default())
            .registry(registry.clone())
            .register(Router::<()>::new())
            .unwrap();
        assert!(registry.is_upkeep_running());

        drop(app);
        registry.stop_upkeep();
        assert!(!registry.is_upkeep_running());
    }

    #[tokio::test]
    async fn test_no_upkeep_without_metrics() {
        let registry = Arc::new(
            MetricsRegistry::builder()
                .histogram("http_request_duration_seconds", DEFAULT_BUCKETS)
                .build()
                .unwrap(),
        );
        let options = HealthOptions {
            expose_metrics: false,
            ..Default::default()
        };
        HealthPlugin::new(options)
            .registry(registry.clone())
            .register(Router::<()>::new())
            .unwrap();
        assert!(!registry.is_upkeep_running());
    }

    #[test]
    fn test_unknown_strategy_fails_registration() {
        let options = HealthOptions {
            auth: AuthConfig::Scalar(AuthSetting::Strategy("nobody".into())),
            ..Default::default()
        };
        let result = HealthPlugin::new(options).register(Router::<()>::new());
        assert!(matches!(result, Err(Error::UnknownAuthStrategy { .. })));
    }

    #[test]
    fn test_invalid_options_fail_registration() {
        let options = HealthOptions {
            probes_success_code: 1000,
            ..Default::default()
        };
        let result = HealthPlugin::new(options).register(Router::<()>::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_shared_registry_collision_fails_registration() {
        let registry = Arc::new(
            MetricsRegistry::builder()
                .histogram("http_request_duration_seconds", DEFAULT_BUCKETS)
                .build()
                .unwrap(),
        );
        let options = HealthOptions {
            collect_default_metrics: false,
            ..Default::default()
        };

        HealthPlugin::new(options.clone())
            .registry(registry.clone())
            .register(Router::<()>::new())
            .unwrap();
        let second = HealthPlugin::new(options).registry(registry).register(Router::<()>::new());
        assert!(matches!(second, Err(Error::Metrics(_))));
    }
}
