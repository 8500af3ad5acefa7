//! Liveness and readiness probes
//!
//! A [`ProbeSet`] is a named collection of asynchronous checks. [`run_probes`]
//! evaluates every check of a set concurrently and folds the outcomes into a
//! [`ProbeReport`]: one line of text per probe plus a single HTTP status code.

use axum::http::StatusCode;
use futures::future::join_all;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix carried by the text of every failed probe.
pub const FAILURE_PREFIX: &str = "KO: ";

/// Text of a probe that succeeded without a detail.
pub const SUCCESS_TEXT: &str = "OK";

/// A single health check.
///
/// `Ok(None)` reports a plain success, `Ok(Some(detail))` a success with a detail
/// shown in place of `"OK"`, and `Err(e)` a failure reported as `"KO: <e>"`.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Run the check once.
    async fn check(&self) -> anyhow::Result<Option<String>>;
}

/// Adapter turning an async closure into a [`Probe`].
pub struct FnProbe<F>(F);

impl<F> FnProbe<F> {
    /// Wrap `f`; it is called once per probe evaluation.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    async fn check(&self) -> anyhow::Result<Option<String>> {
        (self.0)().await
    }
}

/// Probe that always succeeds with `"OK"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOk;

#[async_trait::async_trait]
impl Probe for AlwaysOk {
    async fn check(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Named probes evaluated together for one endpoint.
///
/// Names are unique and keep their insertion order, which is also the key order
/// of the JSON report.
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: Vec<(String, Arc<dyn Probe>)>,
}

impl ProbeSet {
    /// Create an empty set. An endpoint backed by an empty set always answers `OK`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The set used when the host configures nothing: a single `status` probe
    /// answering `"OK"`.
    pub fn default_status() -> Self {
        Self::new().with("status", AlwaysOk)
    }

    /// Add a probe, replacing any probe already registered under `name`.
    pub fn with(mut self, name: impl Into<String>, probe: impl Probe + 'static) -> Self {
        self.insert(name, Arc::new(probe));
        self
    }

    /// Add an async closure as a probe.
    pub fn with_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        self.with(name, FnProbe::new(f))
    }

    /// Insert a shared probe, replacing any probe already registered under `name`.
    pub fn insert(&mut self, name: impl Into<String>, probe: Arc<dyn Probe>) {
        let name = name.into();
        match self.probes.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = probe,
            None => self.probes.push((name, probe)),
        }
    }

    /// Number of probes in the set.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether the set holds no probe.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probe names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.probes.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Outcome of one probe evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Success without a detail
    Ok,
    /// Success with an application supplied detail
    Detail(String),
    /// Failure with the error message
    Failed(String),
}

impl ProbeOutcome {
    fn from_result(result: anyhow::Result<Option<String>>) -> Self {
        match result {
            Ok(Some(detail)) if !detail.is_empty() => Self::Detail(detail),
            Ok(_) => Self::Ok,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    /// Whether the outcome text marks a failure.
    ///
    /// This looks at the text, so a probe whose success detail itself starts with
    /// `"KO: "` counts as failed.
    pub fn is_failure(&self) -> bool {
        self.to_string().starts_with(FAILURE_PREFIX)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str(SUCCESS_TEXT),
            Self::Detail(detail) => f.write_str(detail),
            Self::Failed(message) => write!(f, "{FAILURE_PREFIX}{message}"),
        }
    }
}

/// Outcomes of a whole probe set plus the aggregate status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    outcomes: Vec<(String, ProbeOutcome)>,
    status: StatusCode,
}

impl ProbeReport {
    /// Aggregate status: the error code if any probe failed, the success code otherwise.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Whether every probe succeeded.
    pub fn is_healthy(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| !outcome.is_failure())
    }

    /// Outcome of the probe named `name`.
    pub fn get(&self, name: &str) -> Option<&ProbeOutcome> {
        self.outcomes
            .iter()
            .find(|(probe, _)| probe == name)
            .map(|(_, outcome)| outcome)
    }

    /// `(name, outcome)` pairs in probe-set order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProbeOutcome)> {
        self.outcomes.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Number of entries; always equal to the size of the evaluated set.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the report has no entry.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Serialize for ProbeReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.outcomes.len()))?;
        for (name, outcome) in &self.outcomes {
            map.serialize_entry(name, &outcome.to_string())?;
        }
        map.end()
    }
}

/// Evaluate every probe of `probes` concurrently and aggregate the outcomes.
///
/// Probe failures are absorbed into the report. No timeout is applied: a probe
/// that never settles holds the report back indefinitely.
pub async fn run_probes(probes: &ProbeSet, success: StatusCode, error: StatusCode) -> ProbeReport {
    let results = join_all(probes.probes.iter().map(|(_, probe)| probe.check())).await;

    let outcomes: Vec<(String, ProbeOutcome)> = probes
        .probes
        .iter()
        .zip(results)
        .map(|((name, _), result)| {
            let outcome = ProbeOutcome::from_result(result);
            if let ProbeOutcome::Failed(message) = &outcome {
                warn!(probe = %name, error = %message, "Probe failed");
            }
            (name.clone(), outcome)
        })
        .collect();

    let status = if outcomes.iter().any(|(_, outcome)| outcome.is_failure()) {
        error
    } else {
        success
    };
    debug!(probes = outcomes.len(), status = status.as_u16(), "Probes evaluated");

    ProbeReport { outcomes, status }
}
