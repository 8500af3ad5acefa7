//! Default process metrics
//!
//! Resource usage of the current process, sampled with `sysinfo` each time the
//! metrics endpoint is scraped.

use super::metrics::{GaugeVec, MetricsRegistry};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Options for the default process metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultMetricsOptions {
    /// Prefix prepended to every process metric name
    pub prefix: String,
}

/// Samples the current process and publishes the figures as gauges.
pub struct ProcessCollector {
    pid: Pid,
    system: Mutex<System>,
    resident_memory: GaugeVec,
    virtual_memory: GaugeVec,
    start_time: GaugeVec,
    cpu_usage: GaugeVec,
    uptime: GaugeVec,
}

impl ProcessCollector {
    /// Register the process gauges in `registry`.
    pub fn register(registry: &Arc<MetricsRegistry>, options: &DefaultMetricsOptions) -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| Error::config(format!("cannot identify the current process: {e}")))?;
        let name = |suffix: &str| format!("{}{}", options.prefix, suffix);

        let collector = Self {
            pid,
            system: Mutex::new(System::new()),
            resident_memory: registry.register_gauge(
                &name("process_resident_memory_bytes"),
                "Resident memory size in bytes.",
                &[],
            )?,
            virtual_memory: registry.register_gauge(
                &name("process_virtual_memory_bytes"),
                "Virtual memory size in bytes.",
                &[],
            )?,
            start_time: registry.register_gauge(
                &name("process_start_time_seconds"),
                "Start time of the process since unix epoch in seconds.",
                &[],
            )?,
            cpu_usage: registry.register_gauge(
                &name("process_cpu_usage_percent"),
                "CPU usage of the process since the previous sample, in percent.",
                &[],
            )?,
            uptime: registry.register_gauge(
                &name("process_uptime_seconds"),
                "Time elapsed since the process started, in seconds.",
                &[],
            )?,
        };
        debug!(pid = %pid, prefix = %options.prefix, "Process metrics collection enabled");
        Ok(collector)
    }

    /// Refresh the process figures on the blocking pool.
    ///
    /// The `sysinfo` refresh reads `/proc` and holds the sampler lock, so async
    /// callers go through here instead of [`Self::collect`].
    pub async fn collect_off_runtime(self: &Arc<Self>) {
        let collector = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || collector.collect()).await {
            warn!(error = %e, "Process metrics collection task failed");
        }
    }

    /// Refresh the process figures, blocking the caller.
    pub fn collect(&self) {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let Some(process) = system.process(self.pid) else {
            warn!(pid = %self.pid, "Current process not found while collecting process metrics");
            return;
        };

        self.resident_memory.with_labels(&[]).set(process.memory() as f64);
        self.virtual_memory.with_labels(&[]).set(process.virtual_memory() as f64);
        self.start_time.with_labels(&[]).set(process.start_time() as f64);
        self.cpu_usage.with_labels(&[]).set(f64::from(process.cpu_usage()));
        self.uptime.with_labels(&[]).set(process.run_time() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_publishes_process_gauges() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let collector = ProcessCollector::register(&registry, &DefaultMetricsOptions::default()).unwrap();

        collector.collect();

        let output = registry.render();
        assert!(output.contains("process_resident_memory_bytes"));
        assert!(output.contains("process_start_time_seconds"));
    }

    #[test]
    fn test_prefix_applies_to_every_gauge() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let options = DefaultMetricsOptions {
            prefix: "app_".to_string(),
        };
        let collector = ProcessCollector::register(&registry, &options).unwrap();
        collector.collect();

        let output = registry.render();
        assert!(output.contains("app_process_virtual_memory_bytes"));
        assert!(!output.contains("\nprocess_virtual_memory_bytes"));
    }

    #[tokio::test]
    async fn test_collect_off_runtime_publishes_gauges() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let collector = Arc::new(ProcessCollector::register(&registry, &DefaultMetricsOptions::default()).unwrap());

        collector.collect_off_runtime().await;
        // the sampler lock is released once the blocking task returns
        assert!(collector.system.try_lock().is_some());

        assert!(registry.render().contains("process_uptime_seconds"));
    }

    #[test]
    fn test_second_registration_collides() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let options = DefaultMetricsOptions::default();
        let _first = ProcessCollector::register(&registry, &options).unwrap();
        assert!(ProcessCollector::register(&registry, &options).is_err());
    }
}
