//! Metrics and observability for deltadump.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for extraction runs.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Tables exported successfully
    pub tables_exported: AtomicU64,
    /// Tables whose export failed
    pub tables_failed: AtomicU64,
    /// Tables skipped (zero rows)
    pub tables_skipped: AtomicU64,
    /// Total rows written
    pub rows_written: AtomicU64,
    /// Catalog queries issued (list, describe, count)
    pub catalog_queries: AtomicU64,
    /// High-water-mark summary queries issued
    pub summary_queries: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one table's export outcome.
    pub fn record_table(&self, success: bool, rows: u64) {
        if success {
            self.tables_exported.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tables_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record a skipped (empty) table.
    pub fn record_skip(&self) {
        self.tables_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a catalog query.
    pub fn record_catalog_query(&self) {
        self.catalog_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a summary query.
    pub fn record_summary_query(&self) {
        self.summary_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tables_exported: self.tables_exported.load(Ordering::Relaxed),
            tables_failed: self.tables_failed.load(Ordering::Relaxed),
            tables_skipped: self.tables_skipped.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            catalog_queries: self.catalog_queries.load(Ordering::Relaxed),
            summary_queries: self.summary_queries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Tables exported successfully
    pub tables_exported: u64,
    /// Tables whose export failed
    pub tables_failed: u64,
    /// Tables skipped (zero rows)
    pub tables_skipped: u64,
    /// Total rows written
    pub rows_written: u64,
    /// Catalog queries issued
    pub catalog_queries: u64,
    /// Summary queries issued
    pub summary_queries: u64,
}

impl MetricsSnapshot {
    /// Fraction of attempted tables that exported successfully.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.tables_exported + self.tables_failed;
        if attempted == 0 {
            0.0
        } else {
            self.tables_exported as f64 / attempted as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_table(true, 100);
        metrics.record_table(false, 7);
        metrics.record_skip();
        metrics.record_catalog_query();
        metrics.record_summary_query();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tables_exported, 1);
        assert_eq!(snapshot.tables_failed, 1);
        assert_eq!(snapshot.tables_skipped, 1);
        assert_eq!(snapshot.rows_written, 107);
        assert_eq!(snapshot.catalog_queries, 1);
        assert_eq!(snapshot.summary_queries, 1);
        assert!((snapshot.success_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_timer_reports_elapsed() {
        let timer = Timer::start("op");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        assert!(timer.stop() >= 5);
    }

    #[test]
    fn test_success_rate_with_no_tables() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.success_rate(), 0.0);
    }
}
