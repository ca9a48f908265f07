//! # pixcache store
//!
//! Storage tiers used by the pixcache orchestrator.
//!
//! ## Features
//!
//! - **Memory tier**: thread-safe LRU bounded by a caller-supplied size function,
//!   with per-entry expiry timestamps
//! - **Disk tier**: crash-consistent LRU in a dedicated directory, backed by an
//!   append-only journal with periodic compaction
//! - **Statistics**: hit/miss/eviction counters for both tiers

pub mod disk;
pub mod error;
pub mod memory;
pub mod metrics;

pub use disk::{disk_key, DiskLruCache, Editor, Snapshot};
pub use error::{DiskCacheError, DiskResult, IoOperation};
pub use memory::{LruMemoryCache, SizeOf};
pub use metrics::CacheStats;

/// Expiry timestamp meaning "never expires"
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Milliseconds since the Unix epoch, the unit of every expiry timestamp
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
