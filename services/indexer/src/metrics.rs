//! Consumer metrics
//!
//! Counters per stream consumer plus a batch-latency tracker. Exported as
//! a sorted map and logged when the consumer stops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::info;

pub struct ConsumerMetrics {
    // Batches
    pub batches_committed: AtomicU64,
    pub batches_aborted: AtomicU64,
    pub batch_retries: AtomicU64,
    pub batch_latency_ns: Mutex<LatencyTracker>,

    // Entries
    pub entries_applied: AtomicU64,
    pub undo_applied: AtomicU64,
    pub entries_skipped: AtomicU64,

    /// Last committed cursor.
    pub last_cursor: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self {
            batches_committed: AtomicU64::new(0),
            batches_aborted: AtomicU64::new(0),
            batch_retries: AtomicU64::new(0),
            batch_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            entries_applied: AtomicU64::new(0),
            undo_applied: AtomicU64::new(0),
            entries_skipped: AtomicU64::new(0),
            last_cursor: AtomicU64::new(0),
        }
    }

    /// Record a committed batch.
    pub fn record_commit(
        &self,
        applied: u64,
        undone: u64,
        skipped: u64,
        cursor: u64,
        latency_ns: u64,
    ) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.entries_applied.fetch_add(applied, Ordering::Relaxed);
        self.undo_applied.fetch_add(undone, Ordering::Relaxed);
        self.entries_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.last_cursor.store(cursor, Ordering::Relaxed);
        if let Ok(mut tracker) = self.batch_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Record a batch whose transaction was dropped without committing.
    pub fn record_abort(&self) {
        self.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("batches_committed".to_string(), self.batches_committed.load(Ordering::Relaxed));
        m.insert("batches_aborted".to_string(), self.batches_aborted.load(Ordering::Relaxed));
        m.insert("batch_retries".to_string(), self.batch_retries.load(Ordering::Relaxed));
        m.insert("entries_applied".to_string(), self.entries_applied.load(Ordering::Relaxed));
        m.insert("undo_applied".to_string(), self.undo_applied.load(Ordering::Relaxed));
        m.insert("entries_skipped".to_string(), self.entries_skipped.load(Ordering::Relaxed));
        m.insert("last_cursor".to_string(), self.last_cursor.load(Ordering::Relaxed));
        if let Ok(tracker) = self.batch_latency_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("batch_latency_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("batch_latency_p99_ns".to_string(), p99);
            }
        }
        m
    }

    pub fn log_summary(&self, stream: &str) {
        let m = self.export();
        let get = |name: &str| m.get(name).copied().unwrap_or(0);
        info!(
            stream,
            batches = get("batches_committed"),
            aborted = get("batches_aborted"),
            retries = get("batch_retries"),
            applied = get("entries_applied"),
            undone = get("undo_applied"),
            skipped = get("entries_skipped"),
            cursor = get("last_cursor"),
            p99_ns = get("batch_latency_p99_ns"),
            "Consumer metrics"
        );
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of latency samples for percentile queries.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Percentile (0-100) over the retained window.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_commit_accumulates() {
        let metrics = ConsumerMetrics::new();
        metrics.record_commit(10, 2, 1, 13, 5_000);
        metrics.record_commit(3, 0, 0, 16, 7_000);
        metrics.record_retry();
        metrics.record_abort();

        let m = metrics.export();
        assert_eq!(m["batches_committed"], 2);
        assert_eq!(m["entries_applied"], 13);
        assert_eq!(m["undo_applied"], 2);
        assert_eq!(m["entries_skipped"], 1);
        assert_eq!(m["last_cursor"], 16);
        assert_eq!(m["batch_retries"], 1);
        assert_eq!(m["batches_aborted"], 1);
        assert_eq!(m["batch_latency_p99_ns"], 7_000);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut tracker = LatencyTracker::new(3);
        for v in [1, 2, 3, 100] {
            tracker.record(v);
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.percentile(0), Some(2));
        assert_eq!(tracker.percentile(100), Some(100));
    }

    #[test]
    fn test_empty_tracker_has_no_percentile() {
        let tracker = LatencyTracker::new(10);
        assert!(tracker.is_empty());
        assert_eq!(tracker.percentile(50), None);
        assert!(!ConsumerMetrics::new().export().contains_key("batch_latency_p50_ns"));
    }
}
