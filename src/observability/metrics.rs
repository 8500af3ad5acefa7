//! Metrics registry handle
//!
//! Wraps a Prometheus recorder that is never installed as the global `metrics`
//! recorder: every instrument is registered through an explicit
//! [`MetricsRegistry`] handle, so several registries can live side by side
//! (one per plugin, one per test).
//!
//! Histogram-type metrics are rendered as Prometheus summaries unless their name
//! was given a bucket layout when the registry was built.

use crate::error::{Error, Result};
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Content type of the text exposition format produced by [`MetricsRegistry::render`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Quantiles exported for every summary.
pub const DEFAULT_QUANTILES: &[f64] = &[0.01, 0.05, 0.5, 0.9, 0.95, 0.99, 0.999];

/// Upper bounds (seconds) used for bucketed histograms when none are given.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Period of the background upkeep draining raw histogram samples.
pub const DEFAULT_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Kind of instrument a metric name was registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter
    Counter,
    /// Quantile summary
    Summary,
    /// Bucketed histogram
    Histogram,
    /// Up/down gauge
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Counter => "counter",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
            Self::Gauge => "gauge",
        };
        f.write_str(kind)
    }
}

/// Builder for a [`MetricsRegistry`].
#[derive(Debug, Clone)]
pub struct MetricsRegistryBuilder {
    quantiles: Vec<f64>,
    histograms: Vec<(String, Vec<f64>)>,
    upkeep_interval: Duration,
}

impl Default for MetricsRegistryBuilder {
    fn default() -> Self {
        Self {
            quantiles: DEFAULT_QUANTILES.to_vec(),
            histograms: Vec::new(),
            upkeep_interval: DEFAULT_UPKEEP_INTERVAL,
        }
    }
}

impl MetricsRegistryBuilder {
    /// Quantiles exported for summaries.
    pub fn quantiles(mut self, quantiles: &[f64]) -> Self {
        self.quantiles = quantiles.to_vec();
        self
    }

    /// Declare `name` as a bucketed histogram with the given upper bounds.
    pub fn histogram(mut self, name: impl Into<String>, buckets: &[f64]) -> Self {
        self.histograms.push((name.into(), buckets.to_vec()));
        self
    }

    /// Period of the upkeep task started by [`MetricsRegistry::spawn_upkeep`].
    pub fn upkeep_interval(mut self, interval: Duration) -> Self {
        self.upkeep_interval = interval;
        self
    }

    /// Build the registry.
    pub fn build(self) -> Result<MetricsRegistry> {
        if self.upkeep_interval.is_zero() {
            return Err(Error::config("metrics upkeep interval cannot be zero"));
        }
        let mut builder = PrometheusBuilder::new().set_quantiles(&self.quantiles)?;
        let mut bucketed = HashSet::new();
        for (name, buckets) in self.histograms {
            builder = builder.set_buckets_for_metric(Matcher::Full(name.clone()), &buckets)?;
            bucketed.insert(name);
        }

        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        Ok(MetricsRegistry {
            recorder,
            handle,
            bucketed,
            registered: Mutex::new(HashMap::new()),
            upkeep_interval: self.upkeep_interval,
            upkeep: Mutex::new(None),
        })
    }
}

/// Metrics storage and exposition for one plugin instance.
///
/// Histogram samples are buffered until drained, either by [`Self::render`] or
/// by the upkeep task. Hosts that may never scrape must keep upkeep running.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    bucketed: HashSet<String>,
    registered: Mutex<HashMap<String, MetricKind>>,
    upkeep_interval: Duration,
    upkeep: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsRegistry {
    /// Registry with the default quantiles and no bucketed histogram.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Start configuring a registry.
    pub fn builder() -> MetricsRegistryBuilder {
        MetricsRegistryBuilder::default()
    }

    /// Register a counter family.
    pub fn register_counter(
        self: &Arc<Self>,
        name: &str,
        help: &str,
        label_names: &[&'static str],
    ) -> Result<CounterVec> {
        self.claim(name, MetricKind::Counter)?;
        self.recorder
            .describe_counter(KeyName::from(name.to_owned()), None, SharedString::from(help.to_owned()));
        Ok(CounterVec(Family::new(self, name, label_names)))
    }

    /// Register a summary family (quantiles, sum and count).
    pub fn register_summary(
        self: &Arc<Self>,
        name: &str,
        help: &str,
        label_names: &[&'static str],
    ) -> Result<SummaryVec> {
        self.claim(name, MetricKind::Summary)?;
        self.recorder
            .describe_histogram(KeyName::from(name.to_owned()), None, SharedString::from(help.to_owned()));
        Ok(SummaryVec(Family::new(self, name, label_names)))
    }

    /// Register a bucketed histogram family. The name must have been declared
    /// through [`MetricsRegistryBuilder::histogram`].
    pub fn register_histogram(
        self: &Arc<Self>,
        name: &str,
        help: &str,
        label_names: &[&'static str],
    ) -> Result<HistogramVec> {
        self.claim(name, MetricKind::Histogram)?;
        self.recorder
            .describe_histogram(KeyName::from(name.to_owned()), None, SharedString::from(help.to_owned()));
        Ok(HistogramVec(Family::new(self, name, label_names)))
    }

    /// Register a gauge family.
    pub fn register_gauge(
        self: &Arc<Self>,
        name: &str,
        help: &str,
        label_names: &[&'static str],
    ) -> Result<GaugeVec> {
        self.claim(name, MetricKind::Gauge)?;
        self.recorder
            .describe_gauge(KeyName::from(name.to_owned()), None, SharedString::from(help.to_owned()));
        Ok(GaugeVec(Family::new(self, name, label_names)))
    }

    /// Kind `name` was registered as, if any.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.registered.lock().get(name).copied()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain buffered histogram samples into their summaries and buckets.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Start the periodic upkeep task on the current tokio runtime.
    ///
    /// Idempotent. Returns `false` when called outside a runtime. The task ends
    /// on [`Self::stop_upkeep`] or once the registry is dropped.
    pub fn spawn_upkeep(self: &Arc<Self>) -> bool {
        let mut upkeep = self.upkeep.lock();
        if upkeep.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, metrics upkeep not started; histogram samples are only drained on render");
            return false;
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.upkeep_interval;
        *upkeep = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => registry.run_upkeep(),
                    None => break,
                }
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "Metrics upkeep started");
        true
    }

    /// Stop the upkeep task, if running.
    pub fn stop_upkeep(&self) {
        if let Some(task) = self.upkeep.lock().take() {
            task.abort();
            debug!("Metrics upkeep stopped");
        }
    }

    /// Whether the upkeep task is running.
    pub fn is_upkeep_running(&self) -> bool {
        self.upkeep.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Content type matching [`Self::render`].
    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn claim(&self, name: &str, kind: MetricKind) -> Result<()> {
        if name.is_empty() {
            return Err(Error::metrics("metric names cannot be empty"));
        }
        match kind {
            MetricKind::Histogram if !self.bucketed.contains(name) => {
                return Err(Error::metrics(format!(
                    "histogram '{name}' has no bucket layout in this registry"
                )));
            }
            MetricKind::Summary if self.bucketed.contains(name) => {
                return Err(Error::metrics(format!(
                    "summary '{name}' is declared as a bucketed histogram in this registry"
                )));
            }
            _ => {}
        }

        let mut registered = self.registered.lock();
        if let Some(existing) = registered.get(name) {
            return Err(Error::metrics(format!(
                "a {existing} named '{name}' is already registered"
            )));
        }
        registered.insert(name.to_owned(), kind);
        debug!(metric = name, kind = %kind, "Metric registered");
        Ok(())
    }
}

impl Drop for MetricsRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.upkeep.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("registered", &*self.registered.lock())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct Family {
    registry: Arc<MetricsRegistry>,
    name: String,
    label_names: Vec<&'static str>,
}

impl Family {
    fn new(registry: &Arc<MetricsRegistry>, name: &str, label_names: &[&'static str]) -> Self {
        Self {
            registry: registry.clone(),
            name: name.to_owned(),
            label_names: label_names.to_vec(),
        }
    }

    fn key(&self, values: &[&str]) -> Key {
        debug_assert_eq!(
            values.len(),
            self.label_names.len(),
            "wrong number of label values for {}",
            self.name
        );
        let labels: Vec<Label> = self
            .label_names
            .iter()
            .zip(values)
            .map(|(name, value)| Label::new(*name, (*value).to_owned()))
            .collect();
        Key::from_parts(self.name.clone(), labels)
    }
}

/// Counter family keyed by label values.
#[derive(Clone)]
pub struct CounterVec(Family);

impl CounterVec {
    /// Counter for the given label values, in registration order.
    pub fn with_labels(&self, values: &[&str]) -> Counter {
        self.0.registry.recorder.register_counter(&self.0.key(values), &METADATA)
    }
}

/// Summary family keyed by label values.
#[derive(Clone)]
pub struct SummaryVec(Family);

impl SummaryVec {
    /// Summary for the given label values, in registration order.
    pub fn with_labels(&self, values: &[&str]) -> Histogram {
        self.0.registry.recorder.register_histogram(&self.0.key(values), &METADATA)
    }
}

/// Histogram family keyed by label values.
#[derive(Clone)]
pub struct HistogramVec(Family);

impl HistogramVec {
    /// Histogram for the given label values, in registration order.
    pub fn with_labels(&self, values: &[&str]) -> Histogram {
        self.0.registry.recorder.register_histogram(&self.0.key(values), &METADATA)
    }
}

/// Gauge family keyed by label values.
#[derive(Clone)]
pub struct GaugeVec(Family);

impl GaugeVec {
    /// Gauge for the given label values, in registration order.
    pub fn with_labels(&self, values: &[&str]) -> Gauge {
        self.0.registry.recorder.register_gauge(&self.0.key(values), &METADATA)
    }
}
