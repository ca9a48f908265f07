//! Store statistics snapshots

use serde::{Deserialize, Serialize};

/// Point-in-time statistics for a size-bounded store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry)
    pub misses: u64,
    /// Successful insertions
    pub puts: u64,
    /// Entries dropped to stay under the size bound
    pub evictions: u64,
    /// Entries dropped because their expiry passed
    pub expirations: u64,
    /// Current accounted size
    pub size: u64,
    /// Configured bound
    pub max_size: u64,
    /// Number of live entries
    pub entry_count: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage (0.0 to 100.0)
    pub fn miss_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            return 0.0;
        }
        100.0 - self.hit_rate()
    }

    /// Fraction of the bound currently in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheStats[size={}/{}, entries={}, hits={}, misses={}, hitRate={:.0}%]",
            self.size,
            self.max_size,
            self.entry_count,
            self.hits,
            self.misses,
            self.hit_rate()
        )
    }
}
