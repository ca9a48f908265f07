//! Configuration for the image cache.
//!
//! [`CacheSettings`] is the serializable, file-backed form. [`GlobalConfig`]
//! is the live configuration owned by a
//! [`BitmapCache`](crate::bitmap_cache::BitmapCache), which also carries the
//! downloader in use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::downloader::{Downloader, HttpDownloader};
use crate::error::{DownloadResult, ImageCacheResult};

/// Default memory tier bound (8 MiB)
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 8 * 1024 * 1024;

/// Default disk tier bound (50 MiB)
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Default fallback lifetime for downloads without cache headers (30 days)
pub const DEFAULT_EXPIRY_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Default download timeout
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 15;

/// File name looked up by [`CacheSettings::load_with_hierarchy`]
pub const SETTINGS_FILE_NAME: &str = "images-cache.yaml";

/// How a fetched image should be decoded.
///
/// Two configurations for the same URI are cached as separate memory entries;
/// the `Display` form is part of the memory key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Decode at native size, ignoring the bounds
    pub show_original: bool,
    pub max_width: u32,
    pub max_height: u32,
}

impl DecodeConfig {
    /// Decode downsampled to fit within `max_width` x `max_height`.
    pub fn bounded(max_width: u32, max_height: u32) -> Self {
        Self {
            show_original: false,
            max_width,
            max_height,
        }
    }

    /// Decode at native size.
    pub fn original() -> Self {
        Self {
            show_original: true,
            max_width: 0,
            max_height: 0,
        }
    }

    /// Memory tier key for `uri` under this configuration.
    pub fn cache_key(&self, uri: &str) -> String {
        format!("{}{}", uri, self)
    }
}

impl fmt::Display for DecodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{showOriginal:{},{},{}}}",
            self.show_original, self.max_width, self.max_height
        )
    }
}

/// Memory tier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Whether decoded assets are kept in memory
    pub enabled: bool,
    /// Bound on the summed asset size in bytes
    pub max_size_bytes: usize,
}

/// Disk tier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSettings {
    /// Whether downloaded bytes are kept on disk
    pub enabled: bool,
    /// Dedicated directory for the store
    pub path: PathBuf,
    /// Bound on the summed file size in bytes
    pub max_size_bytes: u64,
}

/// Download settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Lifetime used when the server gives none
    pub default_expiry_seconds: u64,
    /// Request timeout
    pub timeout_seconds: u64,
}

/// Serializable cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub memory: MemorySettings,
    pub disk: DiskSettings,
    pub download: DownloadSettings,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: DEFAULT_MEMORY_CACHE_SIZE,
        }
    }
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_disk_cache_path(),
            max_size_bytes: DEFAULT_DISK_CACHE_SIZE,
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_expiry_seconds: DEFAULT_EXPIRY_SECONDS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Platform cache directory for the disk tier, falling back to the temp dir.
pub fn default_disk_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pixcache")
        .join("images")
}

impl CacheSettings {
    /// Load settings from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    ///
    /// Settings loaded from file, or defaults if the file doesn't exist
    pub fn from_file(path: &Path) -> ImageCacheResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings with hierarchy support.
    ///
    /// Sources, highest priority last:
    /// 1. Built-in defaults
    /// 2. User-level settings (`~/.pixcache/config/images-cache.yaml`)
    /// 3. Project-level settings (`config/images-cache.yaml`)
    pub fn load_with_hierarchy() -> ImageCacheResult<Self> {
        let mut settings = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".pixcache").join("config").join(SETTINGS_FILE_NAME);
            if let Ok(user_settings) = Self::from_file(&user_path) {
                settings = Self::merge(settings, user_settings);
            }
        }

        let project_path = PathBuf::from("config").join(SETTINGS_FILE_NAME);
        if let Ok(project_settings) = Self::from_file(&project_path) {
            settings = Self::merge(settings, project_settings);
        }

        Ok(settings)
    }

    /// Merge two settings, with sections of `override_settings` that differ
    /// from the defaults taking precedence.
    pub fn merge(mut base: Self, override_settings: Self) -> Self {
        let defaults = Self::default();

        if override_settings.memory != defaults.memory {
            base.memory = override_settings.memory;
        }
        if override_settings.disk != defaults.disk {
            base.disk = override_settings.disk;
        }
        if override_settings.download != defaults.download {
            base.download = override_settings.download;
        }

        base
    }

    /// Build the default HTTP downloader from the download section.
    pub fn http_downloader(&self) -> DownloadResult<HttpDownloader> {
        HttpDownloader::new(
            Duration::from_secs(self.download.timeout_seconds),
            Duration::from_secs(self.download.default_expiry_seconds),
        )
    }
}

/// Live configuration read by the cache at each operation.
#[derive(Clone)]
pub struct GlobalConfig {
    pub memory_cache_enabled: bool,
    pub memory_cache_max_size: usize,
    pub disk_cache_enabled: bool,
    pub disk_cache_path: PathBuf,
    pub disk_cache_max_size: u64,
    pub downloader: Arc<dyn Downloader>,
}

impl GlobalConfig {
    /// Configuration with default sizes and path, using `downloader`.
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self::from_settings(&CacheSettings::default(), downloader)
    }

    pub fn from_settings(settings: &CacheSettings, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            memory_cache_enabled: settings.memory.enabled,
            memory_cache_max_size: settings.memory.max_size_bytes,
            disk_cache_enabled: settings.disk.enabled,
            disk_cache_path: settings.disk.path.clone(),
            disk_cache_max_size: settings.disk.max_size_bytes,
            downloader,
        }
    }

    /// Configuration from `settings` with an [`HttpDownloader`] built from
    /// its download section.
    pub fn with_http_downloader(settings: &CacheSettings) -> ImageCacheResult<Self> {
        let downloader = settings.http_downloader()?;
        Ok(Self::from_settings(settings, Arc::new(downloader)))
    }
}

impl fmt::Debug for GlobalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalConfig")
            .field("memory_cache_enabled", &self.memory_cache_enabled)
            .field("memory_cache_max_size", &self.memory_cache_max_size)
            .field("disk_cache_enabled", &self.disk_cache_enabled)
            .field("disk_cache_path", &self.disk_cache_path)
            .field("disk_cache_max_size", &self.disk_cache_max_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_config_display_and_key() {
        let config = DecodeConfig::bounded(100, 100);
        assert_eq!(config.to_string(), "{showOriginal:false,100,100}");
        assert_eq!(
            config.cache_key("http://x/img.png"),
            "http://x/img.png{showOriginal:false,100,100}"
        );
        assert_ne!(
            config.cache_key("http://x/img.png"),
            DecodeConfig {
                show_original: true,
                ..config
            }
            .cache_key("http://x/img.png")
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = CacheSettings::default();
        assert!(settings.memory.enabled);
        assert_eq!(settings.memory.max_size_bytes, 8 * 1024 * 1024);
        assert!(settings.disk.enabled);
        assert_eq!(settings.disk.max_size_bytes, 50 * 1024 * 1024);
        assert!(settings.disk.path.ends_with("pixcache/images"));
        assert_eq!(settings.download.default_expiry_seconds, 2_592_000);
        assert_eq!(settings.download.timeout_seconds, 15);
    }

    #[test]
    fn test_from_file_missing_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings::from_file(&dir.path().join("none.yaml")).unwrap();
        assert_eq!(settings, CacheSettings::default());
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "memory:\n  max_size_bytes: 1024\ndisk:\n  enabled: false").unwrap();

        let settings = CacheSettings::from_file(&path).unwrap();
        assert!(settings.memory.enabled);
        assert_eq!(settings.memory.max_size_bytes, 1024);
        assert!(!settings.disk.enabled);
        assert_eq!(settings.disk.max_size_bytes, DEFAULT_DISK_CACHE_SIZE);
        assert_eq!(settings.download, DownloadSettings::default());
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "memory: [unclosed").unwrap();
        assert!(CacheSettings::from_file(&path).is_err());
    }

    #[test]
    fn test_merge_prefers_overridden_sections() {
        let mut user = CacheSettings::default();
        user.memory.max_size_bytes = 1;
        let mut project = CacheSettings::default();
        project.download.timeout_seconds = 3;

        let merged = CacheSettings::merge(CacheSettings::merge(CacheSettings::default(), user), project);
        assert_eq!(merged.memory.max_size_bytes, 1);
        assert_eq!(merged.download.timeout_seconds, 3);
        assert_eq!(merged.disk, DiskSettings::default());
    }

    #[test]
    fn test_global_config_from_settings() {
        let mut settings = CacheSettings::default();
        settings.disk.path = PathBuf::from("/tmp/pix");
        let config = GlobalConfig::with_http_downloader(&settings).unwrap();
        assert_eq!(config.disk_cache_path, PathBuf::from("/tmp/pix"));
        assert_eq!(config.memory_cache_max_size, DEFAULT_MEMORY_CACHE_SIZE);
        assert!(format!("{:?}", config).contains("/tmp/pix"));
    }
}
