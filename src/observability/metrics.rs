//! Pipeline metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe but lock-free, shared by every node of a trace tree

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Request charge is tracked in thousandths so it fits an atomic integer
const CHARGE_SCALE: f64 = 1000.0;

/// Counters for one query execution
///
/// Uses Relaxed ordering: no counter is used to synchronize other memory.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Backend pages received
    pages_fetched: AtomicU64,
    /// Backend rows received
    documents_fetched: AtomicU64,
    /// Request charge in thousandths
    request_charge_milli: AtomicU64,
    /// Pages fetched ahead of consumption
    prefetches: AtomicU64,
    /// Ranges replaced by children
    splits: AtomicU64,
    /// Ranges replaced by a covering parent
    merges: AtomicU64,
    /// Fetches that returned a failure
    fetch_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one received page
    pub fn record_page(&self, documents: usize, request_charge: f64) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.documents_fetched
            .fetch_add(documents as u64, Ordering::Relaxed);
        let milli = (request_charge.max(0.0) * CHARGE_SCALE).round() as u64;
        self.request_charge_milli.fetch_add(milli, Ordering::Relaxed);
    }

    /// Increment prefetches
    pub fn increment_prefetches(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment splits
    pub fn increment_splits(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment merges
    pub fn increment_merges(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment fetch failures
    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get pages fetched
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    /// Get splits
    pub fn splits(&self) -> u64 {
        self.splits.load(Ordering::Relaxed)
    }

    /// Get merges
    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            documents_fetched: self.documents_fetched.load(Ordering::Relaxed),
            request_charge: self.request_charge_milli.load(Ordering::Relaxed) as f64
                / CHARGE_SCALE,
            prefetches: self.prefetches.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`PipelineMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub pages_fetched: u64,
    pub documents_fetched: u64,
    pub request_charge: f64,
    pub prefetches: u64,
    pub splits: u64,
    pub merges: u64,
    pub fetch_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_zero() {
        let metrics = PipelineMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_fetched, 0);
        assert_eq!(snapshot.request_charge, 0.0);
    }

    #[test]
    fn test_record_page_accumulates_charge() {
        let metrics = PipelineMetrics::new();
        metrics.record_page(3, 2.5);
        metrics.record_page(0, 1.25);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_fetched, 2);
        assert_eq!(snapshot.documents_fetched, 3);
        assert!((snapshot.request_charge - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_topology_counters() {
        let metrics = PipelineMetrics::new();
        metrics.increment_splits();
        metrics.increment_splits();
        metrics.increment_merges();
        assert_eq!(metrics.splits(), 2);
        assert_eq!(metrics.merges(), 1);
    }
}
