//! Consentry Telemetry
//!
//! Metrics for the consent pipeline.
//!
//! Provides:
//! - In-process counters with snapshots for the stats endpoint
//! - Prometheus-facing counters and histograms through the `metrics` facade

pub mod metrics;

pub use crate::metrics::{describe_metrics, MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
