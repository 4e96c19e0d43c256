use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_staged: AtomicU64,
    index_entries: AtomicU64,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    batches_processed: AtomicU64,
    row_errors: AtomicU64,
}

/// Engine-wide counters, shared by every task of one engine.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_staged: u64,
    pub index_entries: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub batches_processed: u64,
    pub row_errors: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_staged(&self, count: u64) {
        self.inner.rows_staged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_index_entries(&self, count: u64) {
        self.inner.index_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_read(&self, count: u64) {
        self.inner.rows_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_written(&self, count: u64) {
        self.inner.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_row_errors(&self, count: u64) {
        self.inner.row_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_staged: self.inner.rows_staged.load(Ordering::Relaxed),
            index_entries: self.inner.index_entries.load(Ordering::Relaxed),
            rows_read: self.inner.rows_read.load(Ordering::Relaxed),
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            row_errors: self.inner.row_errors.load(Ordering::Relaxed),
        }
    }
}
