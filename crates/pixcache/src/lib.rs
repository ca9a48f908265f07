//! Two-tier image cache: downloads images, keeps the raw bytes in a journaled
//! disk LRU and the decoded results in a size-bounded memory LRU.
//!
//! This crate provides:
//! - The fetch pipeline (memory, disk, download, decode, populate)
//! - Lazy background initialization of the disk tier with readiness gating
//! - An HTTP downloader honoring cache headers
//! - An `image`-backed decoder with aspect-preserving downsampling
//! - YAML settings with user and project overrides

pub mod bitmap_cache;
pub mod config;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod space;
pub mod stats;

pub use bitmap_cache::{
    BitmapCache, BitmapCacheBuilder, DiskPhase, DISK_CACHE_APP_VERSION, DISK_CACHE_INDEX,
};
pub use config::{CacheSettings, DecodeConfig, GlobalConfig};
pub use decoder::{DecodeSource, Decoder, ImageDecoder};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{
    DecodeError, DecodeResult, DownloadError, DownloadResult, ImageCacheError, ImageCacheResult,
};
pub use space::{FixedSpaceProbe, SpaceProbe, SystemSpaceProbe};
pub use stats::{BitmapCacheStats, FetchStats};

pub use pixcache_store::{CacheStats, DiskLruCache, LruMemoryCache};
