//! Exchange counters
//!
//! - Counters only, monotonic
//! - Shared through `Arc` between the transaction context and its operations
//! - Relaxed atomics; values are exact once the writers are done

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the intermediate-result exchange
#[derive(Debug, Default)]
pub struct ExchangeMetrics {
    namespaces_created: AtomicU64,
    namespaces_removed: AtomicU64,
    teardown_failures: AtomicU64,
    rows_broadcast: AtomicU64,
    bytes_broadcast: AtomicU64,
    bytes_fetched: AtomicU64,
    fetch_fast_paths: AtomicU64,
    missing_results: AtomicU64,
}

impl ExchangeMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Namespace

    pub fn increment_namespaces_created(&self) {
        self.namespaces_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_namespaces_removed(&self, count: u64) {
        self.namespaces_removed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_teardown_failures(&self, count: u64) {
        self.teardown_failures.fetch_add(count, Ordering::Relaxed);
    }

    // Transfer

    /// Record one row fanned out to every destination
    pub fn record_row_broadcast(&self, bytes: u64) {
        self.rows_broadcast.fetch_add(1, Ordering::Relaxed);
        self.bytes_broadcast.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_fetched(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_fetch_fast_paths(&self) {
        self.fetch_fast_paths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_missing_results(&self) {
        self.missing_results.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            namespaces_created: self.namespaces_created.load(Ordering::Relaxed),
            namespaces_removed: self.namespaces_removed.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            rows_broadcast: self.rows_broadcast.load(Ordering::Relaxed),
            bytes_broadcast: self.bytes_broadcast.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            fetch_fast_paths: self.fetch_fast_paths.load(Ordering::Relaxed),
            missing_results: self.missing_results.load(Ordering::Relaxed),
        }
    }

    /// Export the snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Snapshot of exchange counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub namespaces_created: u64,
    pub namespaces_removed: u64,
    pub teardown_failures: u64,
    pub rows_broadcast: u64,
    pub bytes_broadcast: u64,
    pub bytes_fetched: u64,
    pub fetch_fast_paths: u64,
    pub missing_results: u64,
}
