use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking storage operations performed on behalf of queries.
///
/// Implementations collect counts of writes, scans and the documents they
/// touch. This information can be used for monitoring and for checking
/// that predicate pushdown is effective.
pub trait StorageMetrics: Send + Sync {
    /// Records documents written to a table (inserted or replaced).
    fn documents_written(&self, count: u64);

    /// Records a scan.
    ///
    /// # Parameters
    /// * `pushdown` - Whether the scan carried a predicate the adapter applied.
    fn scan_started(&self, pushdown: bool);

    /// Records documents returned by a scan after any pushdown.
    fn documents_scanned(&self, count: u64);

    /// Records a dropped table.
    fn table_dropped(&self);
}

/// A no-op implementation of [`StorageMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn documents_written(&self, _count: u64) {}
    fn scan_started(&self, _pushdown: bool) {}
    fn documents_scanned(&self, _count: u64) {}
    fn table_dropped(&self) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of documents written.
    pub documents_written: AtomicU64,

    /// Number of scans without a pushdown predicate.
    pub full_scans: AtomicU64,

    /// Number of scans with a pushdown predicate.
    pub filtered_scans: AtomicU64,

    /// Number of documents handed to the executor.
    pub documents_scanned: AtomicU64,

    /// Number of tables dropped.
    pub tables_dropped: AtomicU64,
}

impl StorageMetrics for CounterMetrics {
    fn documents_written(&self, count: u64) {
        self.documents_written.fetch_add(count, Ordering::Relaxed);
    }

    fn scan_started(&self, pushdown: bool) {
        if pushdown {
            self.filtered_scans.fetch_add(1, Ordering::Relaxed);
        } else {
            self.full_scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn documents_scanned(&self, count: u64) {
        self.documents_scanned.fetch_add(count, Ordering::Relaxed);
    }

    fn table_dropped(&self) {
        self.tables_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which discards everything.
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
