//! Counters for cache activity, enabled by the `metrics` feature.
//!
//! [`CacheMetrics`] holds the atomic counters; a
//! [`CacheMetricsSnapshot`] is a plain copy of them that an exporter such as
//! [`PrometheusTextExporter`] can publish.

pub mod exporter;
pub mod metrics_impl;
pub mod snapshot;
pub mod traits;

pub use exporter::PrometheusTextExporter;
pub use metrics_impl::CacheMetrics;
pub use snapshot::CacheMetricsSnapshot;
pub use traits::{CacheMetricsRecorder, MetricsExporter, MetricsReset};
