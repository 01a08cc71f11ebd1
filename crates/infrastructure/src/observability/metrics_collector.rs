//! Metrics collector for the logging fleet controller
//!
//! Counters, gauges and histograms are registered through the `metrics`
//! facade; without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metrics collector for the logging fleet controller
pub struct MetricsCollector {
    // Node registry metrics
    registrations_total: Counter,
    evictions_total: Counter,
    available_nodes: Gauge,

    // Health check metrics
    probe_failures_total: Counter,
    sweep_duration: Histogram,

    // Dispatch metrics
    dispatch_success_total: Counter,
    dispatch_failures_total: Counter,

    // Result metrics
    results_received_total: Counter,
    result_bytes_total: Counter,
    node_errors_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    merge_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            registrations_total: counter!("logman_node_registrations_total"),
            evictions_total: counter!("logman_node_evictions_total"),
            available_nodes: gauge!("logman_available_nodes"),
            probe_failures_total: counter!("logman_probe_failures_total"),
            sweep_duration: histogram!("logman_health_sweep_duration_seconds"),
            dispatch_success_total: counter!("logman_dispatch_success_total"),
            dispatch_failures_total: counter!("logman_dispatch_failures_total"),
            results_received_total: counter!("logman_results_received_total"),
            result_bytes_total: counter!("logman_result_bytes_total"),
            node_errors_total: counter!("logman_node_errors_total"),
            tasks_completed_total: counter!("logman_tasks_completed_total"),
            tasks_failed_total: counter!("logman_tasks_failed_total"),
            merge_duration: histogram!("logman_merge_duration_seconds"),
        }
    }

    pub fn record_registration(&self) {
        self.registrations_total.increment(1);
    }

    pub fn record_eviction(&self) {
        self.evictions_total.increment(1);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures_total.increment(1);
    }

    /// Record the outcome of one health sweep
    pub fn record_sweep(&self, available: usize, duration_seconds: f64) {
        self.available_nodes.set(available as f64);
        self.sweep_duration.record(duration_seconds);
    }

    pub fn record_dispatch(&self, succeeded: usize, failed: usize) {
        self.dispatch_success_total.increment(succeeded as u64);
        self.dispatch_failures_total.increment(failed as u64);
    }

    pub fn record_result_received(&self, bytes: usize) {
        self.results_received_total.increment(1);
        self.result_bytes_total.increment(bytes as u64);
    }

    pub fn record_node_error(&self) {
        self.node_errors_total.increment(1);
    }

    pub fn record_task_completed(&self, merge_seconds: f64) {
        self.tasks_completed_total.increment(1);
        self.merge_duration.record(merge_seconds);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed_total.increment(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`
///
/// Must be called from within a tokio runtime.
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_registration();
        metrics.record_sweep(3, 0.25);
        metrics.record_dispatch(2, 1);
        metrics.record_result_received(2048);
        metrics.record_task_completed(0.1);
    }
}
