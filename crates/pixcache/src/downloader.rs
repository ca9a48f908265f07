//! Resource fetching.
//!
//! A [`Downloader`] streams the resource behind a URI into a sink and reports
//! how long the result may be cached. [`HttpDownloader`] is the default
//! implementation over a blocking `reqwest` client.

use std::io::Write;
use std::time::{Duration, UNIX_EPOCH};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CACHE_CONTROL, EXPIRES};
use tracing::debug;

use pixcache_store::current_timestamp_millis;

use crate::error::{DownloadError, DownloadResult};

/// Default cache lifetime when the server gives none (30 days).
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches a resource by URI into a writable sink.
pub trait Downloader: Send + Sync {
    /// Write the resource behind `uri` to `sink`.
    ///
    /// Returns the expiry timestamp (milliseconds since the epoch) for the
    /// written bytes. An error or a negative timestamp means the fetch failed
    /// and whatever reached the sink must be discarded.
    fn download_to_stream(&self, uri: &str, sink: &mut dyn Write) -> DownloadResult<i64>;
}

/// HTTP(S) downloader honoring `Cache-Control: max-age` and `Expires`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    default_expiry: Duration,
}

impl HttpDownloader {
    /// Create a downloader with the given request timeout and fallback expiry.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built (e.g. TLS backend
    /// initialization fails)
    pub fn new(timeout: Duration, default_expiry: Duration) -> DownloadResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            default_expiry,
        })
    }

    /// Create a downloader with a 15 second timeout and 30 day fallback expiry.
    pub fn with_defaults() -> DownloadResult<Self> {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_EXPIRY)
    }

    pub fn default_expiry(&self) -> Duration {
        self.default_expiry
    }
}

impl Downloader for HttpDownloader {
    fn download_to_stream(&self, uri: &str, sink: &mut dyn Write) -> DownloadResult<i64> {
        if uri.is_empty() {
            return Err(DownloadError::InvalidUri(uri.to_string()));
        }

        let mut response = self.client.get(uri).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let expiry = expiry_from_headers(
            response.headers(),
            current_timestamp_millis(),
            self.default_expiry,
        );
        let written = response.copy_to(sink)?;
        sink.flush()?;
        debug!(uri, bytes = written, expiry, "Downloaded resource");
        Ok(expiry)
    }
}

/// Compute the expiry timestamp for a response received at `now`.
///
/// `Cache-Control: max-age` wins over `Expires`. A missing, unparsable or
/// already past lifetime falls back to `now + default_expiry`.
pub fn expiry_from_headers(headers: &HeaderMap, now: i64, default_expiry: Duration) -> i64 {
    let fallback = now.saturating_add(default_expiry.as_millis() as i64);

    let max_age = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|directive| {
            let (name, seconds) = directive.trim().split_once('=')?;
            if name.trim().eq_ignore_ascii_case("max-age") {
                seconds.trim().trim_matches('"').parse::<i64>().ok()
            } else {
                None
            }
        })
        .next();
    if let Some(seconds) = max_age {
        return if seconds > 0 {
            now.saturating_add(seconds.saturating_mul(1000))
        } else {
            fallback
        };
    }

    let expires = headers
        .get(EXPIRES)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_millis() as i64);
    match expires {
        Some(expires) if expires > now => expires,
        _ => fallback,
    }
}
