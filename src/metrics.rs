//! Metrics collection for the URL cache
//!
//! Counters are plain atomics; a [`CacheMetricsSnapshot`] gives a
//! point-in-time copy for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for `UrlCache`
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    total_requests: AtomicU64,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    stale_entries: AtomicU64,

    origin_fetches: AtomicU64,
    origin_errors: AtomicU64,
    backend_errors: AtomicU64,
    digest_mismatches: AtomicU64,

    bytes_from_origin: AtomicU64,

    // stored as microseconds
    total_request_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_entries: u64,
    pub origin_fetches: u64,
    pub origin_errors: u64,
    pub backend_errors: u64,
    pub digest_mismatches: u64,
    pub bytes_from_origin: u64,
    pub total_request_duration_us: u64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss
    ///
    /// # Arguments
    /// * `stale` - A matching entry existed but was older than the freshness threshold
    pub fn record_cache_miss(&self, stale: bool) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        if stale {
            self.stale_entries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_origin_fetch(&self) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed call, attributed to the origin or to the cache backend
    pub fn record_failure(&self, origin: bool) {
        if origin {
            self.origin_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_digest_mismatch(&self) {
        self.digest_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_from_origin(&self, bytes: u64) {
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one at a time, so a snapshot taken under load may
    /// not be consistent across fields.
    pub fn get_stats(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stale_entries: self.stale_entries.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_errors: self.origin_errors.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            digest_mismatches: self.digest_mismatches.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.stale_entries.store(0, Ordering::Relaxed);
        self.origin_fetches.store(0, Ordering::Relaxed);
        self.origin_errors.store(0, Ordering::Relaxed);
        self.backend_errors.store(0, Ordering::Relaxed);
        self.digest_mismatches.store(0, Ordering::Relaxed);
        self.bytes_from_origin.store(0, Ordering::Relaxed);
        self.total_request_duration_us.store(0, Ordering::Relaxed);
    }
}

impl CacheMetricsSnapshot {
    /// Calculate cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }
}
