//! Plugin options
//!
//! [`HealthOptions`] holds everything that can be expressed as data. Probe sets,
//! the metrics registry and authentication strategies are code and are handed to
//! [`crate::HealthPlugin`] directly.

use crate::error::{Error, Result};
use crate::observability::DefaultMetricsOptions;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Options of the health plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthOptions {
    /// Route of the liveness endpoint.
    pub liveness_route: String,
    /// Route of the readiness endpoint.
    pub readiness_route: String,
    /// Route of the metrics endpoint.
    pub metrics_route: String,
    /// Register the liveness endpoint.
    pub expose_liveness: bool,
    /// Register the readiness endpoint.
    pub expose_readiness: bool,
    /// Register the metrics endpoint and record request telemetry.
    pub expose_metrics: bool,
    /// Status answered by a probe endpoint when every probe passed.
    pub probes_success_code: u16,
    /// Status answered by a probe endpoint when at least one probe failed.
    pub probes_error_code: u16,
    /// Measure routes that carry no monitoring flag.
    pub monitor_all_routes_by_default: bool,
    /// Measure the liveness, readiness and metrics endpoints themselves.
    pub monitor_probes: bool,
    /// Authentication of the three endpoints.
    pub auth: AuthConfig,
    /// Names of the request instruments.
    pub metrics_name: MetricNames,
    /// Collect process metrics on every scrape.
    pub collect_default_metrics: bool,
    /// Options of the process metrics.
    pub default_metrics_options: DefaultMetricsOptions,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            liveness_route: "/liveness".to_string(),
            readiness_route: "/readiness".to_string(),
            metrics_route: "/metrics".to_string(),
            expose_liveness: true,
            expose_readiness: true,
            expose_metrics: true,
            probes_success_code: 200,
            probes_error_code: 500,
            monitor_all_routes_by_default: true,
            monitor_probes: false,
            auth: AuthConfig::default(),
            metrics_name: MetricNames::default(),
            collect_default_metrics: true,
            default_metrics_options: DefaultMetricsOptions::default(),
        }
    }
}

impl HealthOptions {
    /// Load options from a JSON file. Missing keys take their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Validates the options.
    ///
    /// # Returns
    /// `Err(Error::Config)` on an invalid status code, a route not starting with
    /// `/`, two exposed endpoints sharing a route, a per-endpoint `auth` mapping
    /// without an entry for an exposed endpoint, or an empty, malformed or
    /// duplicated metric name.
    pub fn validate(&self) -> Result<()> {
        self.success_status()?;
        self.error_status()?;

        let mut seen: Vec<(&str, Endpoint)> = Vec::new();
        for (endpoint, route, exposed) in self.endpoints() {
            if !route.starts_with('/') {
                return Err(Error::config(format!("{endpoint} route '{route}' must start with '/'")));
            }
            if !exposed {
                continue;
            }
            if let Some((_, other)) = seen.iter().find(|(r, _)| *r == route) {
                return Err(Error::config(format!(
                    "{endpoint} and {other} endpoints share the route '{route}'"
                )));
            }
            seen.push((route, endpoint));

            if let AuthConfig::PerEndpoint(settings) = &self.auth {
                if !settings.contains_key(&endpoint) {
                    return Err(Error::config(format!(
                        "auth mapping has no entry for the exposed {endpoint} endpoint; use false to leave it open"
                    )));
                }
            }
        }

        self.metrics_name.validate()
    }

    /// `probes_success_code` as a status.
    pub fn success_status(&self) -> Result<StatusCode> {
        status_code("probes_success_code", self.probes_success_code)
    }

    /// `probes_error_code` as a status.
    pub fn error_status(&self) -> Result<StatusCode> {
        status_code("probes_error_code", self.probes_error_code)
    }

    /// Route of `endpoint`.
    pub fn route(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Liveness => &self.liveness_route,
            Endpoint::Readiness => &self.readiness_route,
            Endpoint::Metrics => &self.metrics_route,
        }
    }

    /// Whether `endpoint` gets registered.
    pub fn is_exposed(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Liveness => self.expose_liveness,
            Endpoint::Readiness => self.expose_readiness,
            Endpoint::Metrics => self.expose_metrics,
        }
    }

    fn endpoints(&self) -> impl Iterator<Item = (Endpoint, &str, bool)> {
        Endpoint::ALL
            .into_iter()
            .map(move |endpoint| (endpoint, self.route(endpoint), self.is_exposed(endpoint)))
    }
}

fn status_code(field: &str, code: u16) -> Result<StatusCode> {
    if !(100..=599).contains(&code) {
        return Err(Error::config(format!("{field} {code} is not an HTTP status code")));
    }
    StatusCode::from_u16(code).map_err(|e| Error::config(format!("{field} {code}: {e}")))
}

/// Names of the four request instruments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricNames {
    /// Counter of completed requests.
    pub request_counter: String,
    /// Summary of request durations, in milliseconds.
    pub request_summary: String,
    /// Histogram of request durations, in seconds.
    pub request_duration_histogram: String,
    /// Gauge of requests in flight, per method.
    pub current_requests: String,
}

impl Default for MetricNames {
    fn default() -> Self {
        Self {
            request_counter: "http_request_count".to_string(),
            request_summary: "http_request_duration_ms".to_string(),
            request_duration_histogram: "http_request_duration_seconds".to_string(),
            current_requests: "http_current_request_count".to_string(),
        }
    }
}

impl MetricNames {
    fn all(&self) -> [(&'static str, &str); 4] {
        [
            ("request_counter", &self.request_counter),
            ("request_summary", &self.request_summary),
            ("request_duration_histogram", &self.request_duration_histogram),
            ("current_requests", &self.current_requests),
        ]
    }

    fn validate(&self) -> Result<()> {
        let names = self.all();
        for (i, (field, name)) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::config(format!("metric name {field} cannot be empty")));
            }
            if !is_metric_name(name) {
                return Err(Error::config(format!("metric name {field} '{name}' is not a valid Prometheus name")));
            }
            if let Some((other, _)) = names[..i].iter().find(|(_, n)| n == name) {
                return Err(Error::config(format!("metric names {other} and {field} are both '{name}'")));
            }
        }
        Ok(())
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// The three endpoints owned by the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Liveness probe endpoint
    Liveness,
    /// Readiness probe endpoint
    Readiness,
    /// Metrics export endpoint
    Metrics,
}

impl Endpoint {
    /// Every endpoint, in registration order.
    pub const ALL: [Endpoint; 3] = [Endpoint::Liveness, Endpoint::Readiness, Endpoint::Metrics];
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Liveness => "liveness",
            Self::Readiness => "readiness",
            Self::Metrics => "metrics",
        })
    }
}

/// Authentication of one endpoint: `false` or the name of a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AuthSettingRepr", into = "AuthSettingRepr")]
pub enum AuthSetting {
    /// No authentication
    #[default]
    Disabled,
    /// Authenticate with the named strategy
    Strategy(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AuthSettingRepr {
    Flag(bool),
    Name(String),
}

impl TryFrom<AuthSettingRepr> for AuthSetting {
    type Error = String;

    fn try_from(repr: AuthSettingRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            AuthSettingRepr::Flag(false) => Ok(Self::Disabled),
            AuthSettingRepr::Flag(true) => Err("auth must be false or a strategy name, not true".to_string()),
            AuthSettingRepr::Name(name) if name.is_empty() => Err("auth strategy name cannot be empty".to_string()),
            AuthSettingRepr::Name(name) => Ok(Self::Strategy(name)),
        }
    }
}

impl From<AuthSetting> for AuthSettingRepr {
    fn from(setting: AuthSetting) -> Self {
        match setting {
            AuthSetting::Disabled => Self::Flag(false),
            AuthSetting::Strategy(name) => Self::Name(name),
        }
    }
}

/// Authentication of the three endpoints, as one setting for all of them or
/// one setting per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    /// Same setting for every endpoint
    Scalar(AuthSetting),
    /// Per-endpoint settings; every exposed endpoint needs an entry
    PerEndpoint(HashMap<Endpoint, AuthSetting>),
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::Scalar(AuthSetting::Disabled)
    }
}

impl AuthConfig {
    /// Setting that applies to `endpoint`.
    pub fn for_endpoint(&self, endpoint: Endpoint) -> AuthSetting {
        match self {
            Self::Scalar(setting) => setting.clone(),
            Self::PerEndpoint(settings) => settings.get(&endpoint).cloned().unwrap_or_default(),
        }
    }
}

impl From<AuthSetting> for AuthConfig {
    fn from(setting: AuthSetting) -> Self {
        Self::Scalar(setting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = HealthOptions::default();
        assert_eq!(options.liveness_route, "/liveness");
        assert_eq!(options.readiness_route, "/readiness");
        assert_eq!(options.metrics_route, "/metrics");
        assert_eq!(options.probes_success_code, 200);
        assert_eq!(options.probes_error_code, 500);
        assert!(options.monitor_all_routes_by_default);
        assert!(!options.monitor_probes);
        assert_eq!(options.auth, AuthConfig::Scalar(AuthSetting::Disabled));
        assert_eq!(options.metrics_name.request_summary, "http_request_duration_ms");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options: HealthOptions = serde_json::from_str(
            r#"{"liveness_route": "/alive", "metrics_name": {"request_counter": "hits"}}"#,
        )
        .unwrap();
        assert_eq!(options.liveness_route, "/alive");
        assert_eq!(options.readiness_route, "/readiness");
        assert_eq!(options.metrics_name.request_counter, "hits");
        assert_eq!(options.metrics_name.current_requests, "http_current_request_count");
    }

    #[test]
    fn test_auth_forms() {
        let scalar: AuthConfig = serde_json::from_str(r#""bob""#).unwrap();
        assert_eq!(scalar.for_endpoint(Endpoint::Metrics), AuthSetting::Strategy("bob".into()));

        let disabled: AuthConfig = serde_json::from_str("false").unwrap();
        assert_eq!(disabled.for_endpoint(Endpoint::Liveness), AuthSetting::Disabled);

        let mapped: AuthConfig = serde_json::from_str(r#"{"liveness": "alice", "metrics": false}"#).unwrap();
        assert_eq!(mapped.for_endpoint(Endpoint::Liveness), AuthSetting::Strategy("alice".into()));
        assert_eq!(mapped.for_endpoint(Endpoint::Metrics), AuthSetting::Disabled);
        assert_eq!(mapped.for_endpoint(Endpoint::Readiness), AuthSetting::Disabled);

        assert!(serde_json::from_str::<AuthConfig>("true").is_err());
        assert!(serde_json::from_str::<AuthConfig>(r#""""#).is_err());
    }

    #[test]
    fn test_auth_serializes_back() {
        let config = AuthConfig::Scalar(AuthSetting::Disabled);
        assert_eq!(serde_json::to_string(&config).unwrap(), "false");
        let config = AuthConfig::Scalar(AuthSetting::Strategy("bob".into()));
        assert_eq!(serde_json::to_string(&config).unwrap(), r#""bob""#);
    }

    #[test]
    fn test_validate_rejects_bad_status() {
        let options = HealthOptions {
            probes_error_code: 42,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_route() {
        let options = HealthOptions {
            readiness_route: "ready".to_string(),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_shared_route_only_when_exposed() {
        let mut options = HealthOptions {
            readiness_route: "/liveness".to_string(),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        options.expose_readiness = false;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_auth_entry_per_exposed_endpoint() {
        let mut options: HealthOptions = serde_json::from_str(r#"{"auth": {"metrics": "alice"}}"#).unwrap();
        assert!(matches!(options.validate(), Err(Error::Config(_))));

        options.expose_liveness = false;
        options.expose_readiness = false;
        assert!(options.validate().is_ok());

        let options: HealthOptions =
            serde_json::from_str(r#"{"auth": {"liveness": false, "readiness": false, "metrics": "alice"}}"#).unwrap();
        assert!(options.validate().is_ok());

        let options = HealthOptions {
            auth: AuthConfig::PerEndpoint(HashMap::new()),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_metric_names() {
        let mut options = HealthOptions::default();
        options.metrics_name.request_counter = String::new();
        assert!(options.validate().is_err());

        let mut options = HealthOptions::default();
        options.metrics_name.current_requests = "http_request_count".to_string();
        assert!(options.validate().is_err());

        let mut options = HealthOptions::default();
        options.metrics_name.request_summary = "request-duration".to_string();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"probes_success_code": 202, "auth": {{"metrics": "bob"}}}}"#).unwrap();

        let options = HealthOptions::from_file(file.path()).unwrap();
        assert_eq!(options.probes_success_code, 202);
        assert_eq!(options.success_status().unwrap(), StatusCode::ACCEPTED);
        assert_eq!(options.auth.for_endpoint(Endpoint::Metrics), AuthSetting::Strategy("bob".into()));
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            HealthOptions::from_file("/definitely/not/here.json"),
            Err(Error::Io(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(HealthOptions::from_file(file.path()), Err(Error::Json(_))));
    }
}
