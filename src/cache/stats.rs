//! Cache Statistics Module
//!
//! Tracks how memoized calls were served: memory hits, disk hits and recomputations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Calls served from the in-process tier
    pub memory_hits: u64,
    /// Calls served by loading an artifact through the manifest
    pub disk_hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries found but past their expiration
    pub expirations: u64,
    /// Calls that bypassed lookup with the reload flag
    pub reloads: u64,
    /// Artifacts written to the file tier
    pub writes: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of hits across both tiers.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    /// Reloads are not lookups and are excluded.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_disk_hit(&mut self) {
        self.disk_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_reload(&mut self) {
        self.reloads += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }
}
