//! # Metrics Traits
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │    CacheMetricsRecorder      │   written from any thread, &self
//!   │  hit/miss/load/insert/...    │
//!   └──────────────┬───────────────┘
//!                  │ snapshot()
//!                  ▼
//!   ┌──────────────────────────────┐    ┌──────────────────────────────┐
//!   │    CacheMetricsSnapshot      │───►│  MetricsExporter<S>          │
//!   │  plain Copy data + gauges    │    │  (production monitoring)     │
//!   └──────────────────────────────┘    └──────────────────────────────┘
//! ```
//!
//! Recorders take `&self` because the cache records from many threads at
//! once and never holds a lock just to bump a counter.

/// Counters recorded by the cache, its indexes and its generation ring.
pub trait CacheMetricsRecorder {
    fn record_hit(&self);
    fn record_miss(&self);
    fn record_load(&self);
    fn record_load_miss(&self);
    fn record_insert(&self);
    fn record_duplicate(&self);
    fn record_removal(&self);
    fn record_evictions(&self, count: u64);
    fn record_cleanup(&self);
    fn record_clear(&self);
    fn record_rebuild(&self);
    fn record_maintenance_skip(&self);
}

/// Reset metrics between tests or benchmark iterations.
pub trait MetricsReset {
    fn reset_metrics(&self);
}

/// Export/publish metrics to production monitoring backends.
pub trait MetricsExporter<S> {
    fn export(&self, snapshot: &S);
}
