use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::snapshot::CacheMetricsSnapshot;
use crate::metrics::traits::{CacheMetricsRecorder, MetricsReset};

/// Atomic counters shared by every component of one cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_misses: AtomicU64,
    inserts: AtomicU64,
    duplicates: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    cleanups: AtomicU64,
    clears: AtomicU64,
    rebuilds: AtomicU64,
    maintenance_skips: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the counters; gauges are left at zero for the caller to fill.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_misses: self.load_misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cleanups: self.cleanups.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            maintenance_skips: self.maintenance_skips.load(Ordering::Relaxed),
            ..CacheMetricsSnapshot::default()
        }
    }
}

impl CacheMetricsRecorder for CacheMetrics {
    fn record_hit(&self) {
        bump(&self.hits, 1);
    }

    fn record_miss(&self) {
        bump(&self.misses, 1);
    }

    fn record_load(&self) {
        bump(&self.loads, 1);
    }

    fn record_load_miss(&self) {
        bump(&self.load_misses, 1);
    }

    fn record_insert(&self) {
        bump(&self.inserts, 1);
    }

    fn record_duplicate(&self) {
        bump(&self.duplicates, 1);
    }

    fn record_removal(&self) {
        bump(&self.removals, 1);
    }

    fn record_evictions(&self, count: u64) {
        bump(&self.evictions, count);
    }

    fn record_cleanup(&self) {
        bump(&self.cleanups, 1);
    }

    fn record_clear(&self) {
        bump(&self.clears, 1);
    }

    fn record_rebuild(&self) {
        bump(&self.rebuilds, 1);
    }

    fn record_maintenance_skip(&self) {
        bump(&self.maintenance_skips, 1);
    }
}

impl MetricsReset for CacheMetrics {
    fn reset_metrics(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.loads,
            &self.load_misses,
            &self.inserts,
            &self.duplicates,
            &self.removals,
            &self.evictions,
            &self.cleanups,
            &self.clears,
            &self.rebuilds,
            &self.maintenance_skips,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
