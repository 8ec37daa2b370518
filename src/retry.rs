//! Caller-side retry policy
//!
//! Nothing in the crate retries on its own. Callers that want retries opt
//! in through `UrlCache::cache_url_with_retry` or by driving a
//! [`RetryPolicy`] themselves.

use crate::error::StorageError;
use std::time::Duration;

/// Backoff doubles this many times, then stays flat
const MAX_BACKOFF_STEPS: usize = 10;

/// How often, and how patiently, a caller repeats a failed `cache_url`
///
/// Each retry re-runs the whole operation: a fresh listing, and on a miss
/// a fresh origin fetch and upload. Only errors whose
/// [`StorageError::should_retry`] is true are repeated, so digest
/// mismatches, bad URLs and 4xx answers fail on the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: usize,
    /// Sleep before retry `n` is `backoff_ms[n]`; the last entry repeats
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Up to `max_retries` repeats, sleeping 100ms, 200ms, 400ms, ...
    pub fn new(max_retries: usize) -> Self {
        let backoff_ms = (0..max_retries.min(MAX_BACKOFF_STEPS))
            .map(|i| 100 * 2u64.pow(i as u32))
            .collect();

        RetryPolicy {
            max_retries,
            backoff_ms,
        }
    }

    /// Single attempt; `cache_url_with_retry` then behaves like `cache_url`
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Whether the caller should repeat after `error` ended attempt
    /// number `attempt` (zero based)
    pub fn should_retry(&self, attempt: usize, error: &StorageError) -> bool {
        attempt < self.max_retries && error.should_retry()
    }

    /// Sleep before the repeat that follows attempt `attempt`
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt)
            .copied()
            .unwrap_or_else(|| *self.backoff_ms.last().unwrap_or(&1000));
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
