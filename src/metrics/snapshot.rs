use std::fmt;

/// Point-in-time copy of a cache's counters plus gauges read at snapshot time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,

    pub loads: u64,
    pub load_misses: u64, // loader returned nothing (or failed)

    pub inserts: u64,
    pub duplicates: u64, // inserts resolved to an already cached node
    pub removals: u64,
    pub evictions: u64,

    pub cleanups: u64,
    pub clears: u64,
    pub rebuilds: u64,
    pub maintenance_skips: u64, // another thread held the maintenance lock

    // gauges captured at snapshot time
    pub live: usize,
    pub total: usize,
    pub capacity: usize,
    pub generation_span: u64,
}

impl CacheMetricsSnapshot {
    /// Fraction of index lookups answered from the cache, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

impl fmt::Display for CacheMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} hit_rate={:.3} loads={} load_misses={} inserts={} \
             duplicates={} removals={} evictions={} cleanups={} clears={} rebuilds={} \
             skips={} live={}/{} total={} generations={}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.loads,
            self.load_misses,
            self.inserts,
            self.duplicates,
            self.removals,
            self.evictions,
            self.cleanups,
            self.clears,
            self.rebuilds,
            self.maintenance_skips,
            self.live,
            self.capacity,
            self.total,
            self.generation_span,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_handles_zero_lookups() {
        let snap = CacheMetricsSnapshot::default();
        assert_eq!(snap.hit_rate(), 0.0);

        let snap = CacheMetricsSnapshot {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((snap.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn display_includes_gauges() {
        let snap = CacheMetricsSnapshot {
            live: 4,
            capacity: 10,
            ..Default::default()
        };
        let text = snap.to_string();
        assert!(text.contains("live=4/10"));
        assert!(text.contains("hit_rate=0.000"));
    }
}
