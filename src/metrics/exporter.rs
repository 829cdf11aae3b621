use std::io::Write;

use parking_lot::Mutex;

use crate::metrics::snapshot::CacheMetricsSnapshot;
use crate::metrics::traits::MetricsExporter;

/// Prometheus text exporter for cache metrics snapshots.
///
/// Writes the text exposition format so the output can be scraped by
/// Prometheus or forwarded to an OpenTelemetry collector. Write errors are
/// dropped; metrics export never fails a cache operation.
#[derive(Debug)]
pub struct PrometheusTextExporter<W: Write + Send> {
    prefix: String,
    writer: Mutex<W>,
}

impl<W: Write + Send> PrometheusTextExporter<W> {
    pub fn new(prefix: impl Into<String>, writer: W) -> Self {
        Self {
            prefix: prefix.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the writer, e.g. to read back a `Vec<u8>` buffer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_sample(writer: &mut W, kind: &str, name: &str, value: u64) {
        let _ = writeln!(writer, "# TYPE {} {}", name, kind);
        let _ = writeln!(writer, "{} {}", name, value);
    }

    fn metric_name(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }
}

impl<W: Write + Send> MetricsExporter<CacheMetricsSnapshot> for PrometheusTextExporter<W> {
    fn export(&self, snapshot: &CacheMetricsSnapshot) {
        let counters = [
            ("hits_total", snapshot.hits),
            ("misses_total", snapshot.misses),
            ("loads_total", snapshot.loads),
            ("load_misses_total", snapshot.load_misses),
            ("inserts_total", snapshot.inserts),
            ("duplicates_total", snapshot.duplicates),
            ("removals_total", snapshot.removals),
            ("evictions_total", snapshot.evictions),
            ("cleanups_total", snapshot.cleanups),
            ("clears_total", snapshot.clears),
            ("rebuilds_total", snapshot.rebuilds),
            ("maintenance_skips_total", snapshot.maintenance_skips),
        ];
        let gauges = [
            ("live_items", snapshot.live as u64),
            ("total_items", snapshot.total as u64),
            ("capacity", snapshot.capacity as u64),
            ("generation_span", snapshot.generation_span),
        ];

        let mut writer = self.writer.lock();
        for (suffix, value) in counters {
            Self::write_sample(&mut writer, "counter", &self.metric_name(suffix), value);
        }
        for (suffix, value) in gauges {
            Self::write_sample(&mut writer, "gauge", &self.metric_name(suffix), value);
        }
        let _ = writer.flush();
    }
}
