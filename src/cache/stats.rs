//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, loads and removals.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of lookups served from a live entry
    pub hits: u64,
    /// Number of lookups that found no live entry
    pub misses: u64,
    /// Number of entries evicted to enforce capacity
    pub evictions: u64,
    /// Number of expired entries removed, lazily or by the janitor
    pub expirations: u64,
    /// Number of loader invocations
    pub loads: u64,
    /// Number of loader invocations that returned an error
    pub load_failures: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    // == Record Load ==
    /// Counts a loader invocation and whether it failed.
    pub fn record_load(&mut self, failed: bool) {
        self.loads += 1;
        if failed {
            self.load_failures += 1;
        }
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 0);
        assert_eq!(stats.loads, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_record_load() {
        let mut stats = CacheStats::new();
        stats.record_load(false);
        stats.record_load(true);
        stats.record_load(true);
        assert_eq!(stats.loads, 3);
        assert_eq!(stats.load_failures, 2);
    }

    #[test]
    fn test_record_removals() {
        let mut stats = CacheStats::new();
        stats.record_eviction();
        stats.record_expirations(4);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.expirations, 4);
    }
}
