//! Cache metrics.
//!
//! Counters go through the `metrics` facade, so they are no-ops until the
//! embedding application installs a recorder. Each manager also keeps its own
//! atomic tally, readable through [`CacheManager::stats`](crate::CacheManager::stats).

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_NIL_HITS_TOTAL: &str = "cache_nil_hits_total";
    pub const CACHE_FILLS_TOTAL: &str = "cache_fills_total";
    pub const CACHE_LOCK_TIMEOUTS_TOTAL: &str = "cache_lock_timeouts_total";
}

/// Record a cache hit.
pub fn record_cache_hit(backend: &str) {
    counter!(names::CACHE_HITS_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss(backend: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Record a read that found the negative-cache marker.
pub fn record_nil_hit(backend: &str) {
    counter!(names::CACHE_NIL_HITS_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Record a fill lock handed to a caller.
pub fn record_fill(backend: &str) {
    counter!(names::CACHE_FILLS_TOTAL, "backend" => backend.to_string()).increment(1);
}

pub fn record_lock_timeout(backend: &str) {
    counter!(names::CACHE_LOCK_TIMEOUTS_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Reads that found the negative-cache marker.
    pub nil_hits: u64,
    /// Fill locks handed out.
    pub fills: u64,
    /// Fill-lock acquisitions that ran out of attempts.
    pub lock_timeouts: u64,
}

impl CacheStats {
    /// Hit rate as a percentage. Negative hits count as hits.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.nil_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    nil_hits: AtomicU64,
    fills: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self, backend: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        record_cache_hit(backend);
    }

    pub(crate) fn miss(&self, backend: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        record_cache_miss(backend);
    }

    pub(crate) fn nil_hit(&self, backend: &str) {
        self.nil_hits.fetch_add(1, Ordering::Relaxed);
        record_nil_hit(backend);
    }

    pub(crate) fn fill(&self, backend: &str) {
        self.fills.fetch_add(1, Ordering::Relaxed);
        record_fill(backend);
    }

    pub(crate) fn lock_timeout(&self, backend: &str) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
        record_lock_timeout(backend);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            nil_hits: self.nil_hits.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_calculation() {
        let stats = CacheStats {
            hits: 60,
            nil_hits: 15,
            misses: 25,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.hit("memory");
        recorder.hit("memory");
        recorder.miss("memory");
        recorder.fill("memory");
        recorder.lock_timeout("memory");

        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.nil_hits, 0);
        assert_eq!(stats.fills, 1);
        assert_eq!(stats.lock_timeouts, 1);
    }
}
