//! End-to-end tests for the two-tier image cache
//!
//! These tests drive a real `ImageDecoder` over PNG payloads served by an
//! in-process downloader, and check:
//! - the documented fetch scenarios for memory and disk keys
//! - persistence of disk entries and expiry across cache instances
//! - recovery from interrupted edits and corrupt journals
//! - clearing and readiness across threads

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use image::{DynamicImage, ImageFormat, RgbImage};
use pixcache::{
    BitmapCache, DecodeConfig, DiskPhase, DownloadError, DownloadResult, Downloader,
    FixedSpaceProbe, GlobalConfig, ImageDecoder, DISK_CACHE_APP_VERSION, DISK_CACHE_INDEX,
};
use pixcache_store::{disk_key, DiskLruCache};
use tempfile::TempDir;

const EXPIRY: i64 = 4_102_444_800_000;
const IMG_URI: &str = "http://x/img.png";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut cursor, ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}

/// Serves a 400x200 PNG for every URI except those containing "missing"
#[derive(Default)]
struct PngServer {
    calls: AtomicUsize,
}

impl Downloader for PngServer {
    fn download_to_stream(&self, uri: &str, sink: &mut dyn Write) -> DownloadResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if uri.contains("missing") {
            return Err(DownloadError::Status {
                uri: uri.to_string(),
                status: 404,
            });
        }
        sink.write_all(&png(400, 200))?;
        Ok(EXPIRY)
    }
}

fn new_cache(dir: &Path, server: Arc<PngServer>) -> BitmapCache<ImageDecoder> {
    let mut config = GlobalConfig::new(server);
    config.disk_cache_path = dir.join("images");
    BitmapCache::builder(config)
        .space_probe(FixedSpaceProbe(None))
        .build()
}

#[test]
fn test_fetch_scenarios() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let server = Arc::new(PngServer::default());
    let cache = new_cache(dir.path(), server.clone());

    let bounded = DecodeConfig::bounded(100, 100);
    let small = cache.fetch(IMG_URI, &bounded).unwrap();
    assert_eq!((small.width(), small.height()), (100, 50));
    assert_eq!(
        bounded.cache_key(IMG_URI),
        "http://x/img.png{showOriginal:false,100,100}"
    );
    assert!(cache.get_from_memory(IMG_URI, &bounded).is_some());

    let original = DecodeConfig::original();
    let full = cache.fetch(IMG_URI, &original).unwrap();
    assert_eq!((full.width(), full.height()), (400, 200));
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.memory.as_ref().unwrap().entry_count, 2);
    assert_eq!(stats.fetch.disk_hits, 1);
    assert_eq!(stats.disk_size, Some(png(400, 200).len() as u64));

    cache.close();
    let store = DiskLruCache::open(dir.path().join("images"), DISK_CACHE_APP_VERSION, 1, 1 << 20).unwrap();
    assert_eq!(store.get_expiry_timestamp(IMG_URI).unwrap(), Some(EXPIRY));
    let mut snapshot = store.get(IMG_URI).unwrap().unwrap();
    assert_eq!(snapshot.read_value(DISK_CACHE_INDEX).unwrap(), png(400, 200));
}

#[test]
fn test_disk_entries_survive_new_instance() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let server = Arc::new(PngServer::default());
    {
        let cache = new_cache(dir.path(), server.clone());
        cache.fetch(IMG_URI, &DecodeConfig::original()).unwrap();
        cache.close();
    }

    let cache = new_cache(dir.path(), server.clone());
    let asset = cache
        .get_from_disk(IMG_URI, &DecodeConfig::bounded(50, 50))
        .unwrap();
    assert_eq!((asset.width(), asset.height()), (50, 25));
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_resource_is_a_miss_everywhere() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cache = new_cache(dir.path(), Arc::new(PngServer::default()));
    let config = DecodeConfig::original();

    assert!(cache.fetch("http://x/missing.png", &config).is_none());
    assert!(cache.get_from_memory("http://x/missing.png", &config).is_none());
    assert!(cache.get_from_disk("http://x/missing.png", &config).is_none());

    let files: Vec<_> = fs::read_dir(dir.path().join("images"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&disk_key("http://x/missing.png")))
        .collect();
    assert!(files.is_empty(), "left behind: {:?}", files);
}

#[test]
fn test_interrupted_edit_is_discarded_on_open() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("images");
    {
        let store = DiskLruCache::open(&path, DISK_CACHE_APP_VERSION, 1, 1 << 20).unwrap();
        let mut editor = store.edit(IMG_URI).unwrap().unwrap();
        editor.set(DISK_CACHE_INDEX, b"half written").unwrap();
        // simulate a crash: the editor never commits or aborts
        std::mem::forget(editor);
        store.flush().unwrap();
    }

    let name = disk_key(IMG_URI);
    assert!(path.join(format!("{}.0.tmp", name)).exists());

    let server = Arc::new(PngServer::default());
    let cache = new_cache(dir.path(), server.clone());
    assert!(cache.get_from_disk(IMG_URI, &DecodeConfig::original()).is_none());
    assert!(!path.join(format!("{}.0.tmp", name)).exists());

    assert!(cache.fetch(IMG_URI, &DecodeConfig::original()).is_some());
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_corrupt_journal_starts_empty() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("images");
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("journal"), "something else entirely\n").unwrap();
    fs::write(path.join("stray.0"), b"junk").unwrap();

    let cache = new_cache(dir.path(), Arc::new(PngServer::default()));
    cache.init_disk_cache();
    assert_eq!(cache.disk_phase(), DiskPhase::Ready);
    assert_eq!(cache.stats().disk_size, Some(0));
    assert!(!path.join("stray.0").exists());
    assert!(cache.fetch(IMG_URI, &DecodeConfig::original()).is_some());
}

#[test]
fn test_clear_disk_while_readers_wait() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let server = Arc::new(PngServer::default());
    let cache = Arc::new(new_cache(dir.path(), server.clone()));
    let config = DecodeConfig::original();
    cache.fetch(IMG_URI, &config).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                // either the old entry or a miss after the wipe; never a panic
                let _ = cache.get_from_disk(IMG_URI, &DecodeConfig::original());
            })
        })
        .collect();
    cache.clear_disk();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(cache.disk_phase(), DiskPhase::Ready);
    assert!(cache.get_from_disk(IMG_URI, &config).is_none());
    assert!(cache.get_from_memory(IMG_URI, &config).is_some());
}

#[tokio::test]
async fn test_background_init_then_async_fetch() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let server = Arc::new(PngServer::default());
    let cache = Arc::new(new_cache(dir.path(), server.clone()));

    let handle = cache.spawn_disk_init();
    let asset = cache
        .fetch_async(IMG_URI, DecodeConfig::bounded(40, 40))
        .await
        .unwrap();
    assert_eq!((asset.width(), asset.height()), (40, 20));
    if let Some(handle) = handle {
        handle.join().unwrap();
    }
    assert!(cache.stats().disk_size.unwrap_or(0) > 0);
}
