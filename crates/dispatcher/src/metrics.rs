//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Batches the sink accepted
    batch_count: AtomicU64,
    /// Items inside accepted batches
    item_count: AtomicU64,
    /// Batches given up on after the last attempt
    failure_count: AtomicU64,
    /// Individual retried writes
    retry_count: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count.load(Ordering::Relaxed)
    }

    pub fn item_count(&self) -> u64 {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Count an accepted batch of `items` items
    pub fn record_delivered(&self, items: usize) {
        self.batch_count.fetch_add(1, Ordering::Relaxed);
        self.item_count.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn inc_retry_count(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batch_count: self.batch_count(),
            item_count: self.item_count(),
            failure_count: self.failure_count(),
            retry_count: self.retry_count(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batch_count: u64,
    pub item_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
}
