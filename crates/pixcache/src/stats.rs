//! Fetch pipeline counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use pixcache_store::CacheStats;

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    /// Lookups answered by the memory tier
    pub memory_hits: u64,
    /// Reads answered by a committed disk entry
    pub disk_hits: u64,
    /// Downloads started
    pub downloads: u64,
    /// Downloads that errored or reported a negative expiry
    pub download_failures: u64,
    /// Sources that could not be decoded
    pub decode_failures: u64,
}

/// Thread-safe pipeline counter tracker
#[derive(Debug, Default)]
pub struct FetchMetrics {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    downloads: AtomicU64,
    download_failures: AtomicU64,
    decode_failures: AtomicU64,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_failure(&self) {
        self.download_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counter values
    pub fn snapshot(&self) -> FetchStats {
        FetchStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Combined view of the pipeline and both tiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BitmapCacheStats {
    pub fetch: FetchStats,
    /// `None` when the memory tier is disabled
    pub memory: Option<CacheStats>,
    /// Bytes used by the disk tier, `None` when it is not open
    pub disk_size: Option<u64>,
    pub disk_max_size: Option<u64>,
}

impl fmt::Display for BitmapCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BitmapCacheStats[memoryHits={}, diskHits={}, downloads={}, downloadFailures={}, decodeFailures={}",
            self.fetch.memory_hits,
            self.fetch.disk_hits,
            self.fetch.downloads,
            self.fetch.download_failures,
            self.fetch.decode_failures
        )?;
        if let Some(memory) = &self.memory {
            write!(f, ", memory={}", memory)?;
        }
        if let (Some(size), Some(max_size)) = (self.disk_size, self.disk_max_size) {
            write!(f, ", disk={}/{}", size, max_size)?;
        }
        write!(f, "]")
    }
}
