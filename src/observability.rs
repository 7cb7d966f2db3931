//! Loader metrics (counters only)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-loader counters
#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced: AtomicU64,
    fetches_started: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    late_results_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = name, "Metric incremented");
    }

    pub fn cache_hit(&self) {
        Self::bump(&self.cache_hits, "cache_hits");
    }

    pub fn cache_miss(&self) {
        Self::bump(&self.cache_misses, "cache_misses");
    }

    pub fn coalesced(&self) {
        Self::bump(&self.coalesced, "coalesced");
    }

    pub fn fetch_started(&self) {
        Self::bump(&self.fetches_started, "fetches_started");
    }

    pub fn fetch_succeeded(&self) {
        Self::bump(&self.fetches_succeeded, "fetches_succeeded");
    }

    pub fn fetch_failed(&self) {
        Self::bump(&self.fetches_failed, "fetches_failed");
    }

    pub fn timed_out(&self) {
        Self::bump(&self.timeouts, "timeouts");
    }

    /// Count of registrations removed by a cancel call
    pub fn cancelled(&self, registrations: usize) {
        self.cancellations
            .fetch_add(registrations as u64, Ordering::Relaxed);
    }

    pub fn late_result_dropped(&self) {
        Self::bump(&self.late_results_dropped, "late_results_dropped");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            late_results_dropped: self.late_results_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub coalesced: u64,
    pub fetches_started: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub late_results_dropped: u64,
}
