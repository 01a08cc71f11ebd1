//! Observability module
//!
//! Metrics collection and the Prometheus exporter.

pub mod metrics_collector;

pub use metrics_collector::{init_metrics_exporter, MetricsCollector};
