//! Error types for the image cache and its collaborators.

use thiserror::Error;

use pixcache_store::DiskCacheError;

/// Result type for cache configuration and lifecycle operations.
pub type ImageCacheResult<T> = Result<T, ImageCacheError>;

/// Result type returned by downloaders.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Result type returned by decoders.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors surfaced by cache configuration and lifecycle operations.
#[derive(Debug, Error)]
pub enum ImageCacheError {
    /// Disk store operation failed.
    #[error("Disk cache error: {0}")]
    Disk(#[from] DiskCacheError),

    /// Default downloader could not be built.
    #[error("Downloader error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for ImageCacheError {
    fn from(err: serde_yaml::Error) -> Self {
        ImageCacheError::Config(err.to_string())
    }
}

/// Errors that can occur while fetching a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport or protocol failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Unexpected status {status} for {uri}")]
    Status { uri: String, status: u16 },

    /// Writing to the sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URI could not be handled.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

/// Errors that can occur while decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Bytes were not a decodable image.
    #[error("Invalid image: {0}")]
    Image(#[from] image::ImageError),

    /// Reading the source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested bounds cannot be satisfied.
    #[error("Invalid bounds {max_width}x{max_height}")]
    InvalidBounds { max_width: u32, max_height: u32 },
}
