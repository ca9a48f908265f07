//! Two-tier cache orchestration.
//!
//! [`BitmapCache`] owns a memory tier of decoded assets keyed by
//! `uri + decode config` and a disk tier of downloaded bytes keyed by URI.
//! [`BitmapCache::fetch`] does not consult the memory tier; it runs:
//!
//! 1. disk snapshot for the URI, or download into a disk editor and commit
//! 2. direct download into a buffer when the disk tier produced no usable
//!    stream: it is unavailable, the entry is being written by someone else,
//!    or the download into the editor failed
//! 3. decode, exact or bounded by the decode config
//! 4. populate the memory tier unless a live entry already exists
//!
//! The disk tier is opened lazily. Its readiness moves through
//! [`DiskPhase`]; every operation that touches the disk waits on a condition
//! variable until initialization has finished, and initialization itself
//! never waits. Failures anywhere in the pipeline are logged and reported to
//! the caller as a miss.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use pixcache_store::{DiskLruCache, LruMemoryCache};

use crate::config::{DecodeConfig, GlobalConfig};
use crate::decoder::{DecodeSource, Decoder, ImageDecoder};
use crate::downloader::Downloader;
use crate::space::{SpaceProbe, SystemSpaceProbe};
use crate::stats::{BitmapCacheStats, FetchMetrics};

/// App version recorded in (and required of) the disk journal
pub const DISK_CACHE_APP_VERSION: u32 = 1;

/// Value slot holding the downloaded bytes
pub const DISK_CACHE_INDEX: usize = 0;

const DISK_CACHE_VALUE_COUNT: usize = 1;

const DISK_INIT_THREAD_NAME: &str = "pixcache-disk-init";

/// Disk tier readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskPhase {
    Uninitialized,
    Initializing,
    Ready,
}

struct DiskState {
    phase: DiskPhase,
    /// `None` once ready means the tier is disabled or failed to open
    store: Option<Arc<DiskLruCache>>,
}

/// Bytes to decode plus the lifetime they were fetched with
struct FetchMeta {
    source: DecodeSource,
    expiry_timestamp: i64,
}

enum DiskFetch {
    Fetched(FetchMeta),
    /// Disk could not serve or store the resource; download directly
    Fallback,
}

type MemoryTier<A> = LruMemoryCache<String, A>;

/// Memory + disk LRU cache for downloaded, decoded images.
pub struct BitmapCache<D: Decoder = ImageDecoder> {
    config: RwLock<GlobalConfig>,
    memory: RwLock<Option<Arc<MemoryTier<D::Asset>>>>,
    disk: Mutex<DiskState>,
    disk_ready: Condvar,
    decoder: Arc<D>,
    space_probe: Box<dyn SpaceProbe>,
    metrics: FetchMetrics,
}

impl BitmapCache<ImageDecoder> {
    /// Builder using the default [`ImageDecoder`].
    pub fn builder(config: GlobalConfig) -> BitmapCacheBuilder<ImageDecoder> {
        BitmapCacheBuilder::new(config)
    }
}

impl<D> BitmapCache<D>
where
    D: Decoder + 'static,
{
    /// Create a cache with the memory tier built and the disk tier
    /// uninitialized.
    pub fn new(config: GlobalConfig, decoder: D) -> Self {
        Self::with_parts(config, decoder, Box::new(SystemSpaceProbe::new()))
    }

    fn with_parts(config: GlobalConfig, decoder: D, space_probe: Box<dyn SpaceProbe>) -> Self {
        let cache = Self {
            config: RwLock::new(config),
            memory: RwLock::new(None),
            disk: Mutex::new(DiskState {
                phase: DiskPhase::Uninitialized,
                store: None,
            }),
            disk_ready: Condvar::new(),
            decoder: Arc::new(decoder),
            space_probe,
            metrics: FetchMetrics::new(),
        };
        cache.init_memory_cache();
        cache
    }

    /// Copy of the live configuration
    pub fn config(&self) -> GlobalConfig {
        self.config.read().clone()
    }

    pub fn disk_phase(&self) -> DiskPhase {
        self.disk.lock().phase
    }

    /// (Re)build the memory tier, discarding its contents. Drops the tier
    /// when memory caching is disabled.
    pub fn init_memory_cache(&self) {
        let (enabled, max_size) = {
            let config = self.config.read();
            (config.memory_cache_enabled, config.memory_cache_max_size)
        };

        let mut memory = self.memory.write();
        if let Some(previous) = memory.take() {
            previous.evict_all();
        }
        if !enabled {
            debug!("Memory cache disabled");
            return;
        }

        let decoder = Arc::clone(&self.decoder);
        *memory = Some(Arc::new(LruMemoryCache::new(
            max_size,
            move |_: &String, asset: &D::Asset| decoder.asset_size(asset),
        )));
        debug!(max_size, "Initialized memory cache");
    }

    /// Open the disk tier if it is not open, then mark it ready and wake
    /// every waiter. A failed open leaves the tier absent but still ready,
    /// so callers fall back to direct downloads.
    pub fn init_disk_cache(&self) {
        if self.begin_disk_init() {
            self.finish_disk_init();
        }
    }

    /// Run [`init_disk_cache`](Self::init_disk_cache) on a background
    /// thread. The tier is marked initializing before this returns, so disk
    /// operations issued afterwards wait for it.
    ///
    /// Returns `None` when there was nothing to initialize.
    pub fn spawn_disk_init(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.begin_disk_init() {
            return None;
        }

        let cache = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(DISK_INIT_THREAD_NAME.to_string())
            .spawn(move || cache.finish_disk_init());
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn disk init thread, initializing inline");
                self.finish_disk_init();
                None
            }
        }
    }

    /// Flip to `Initializing` if an open is needed. Never waits.
    fn begin_disk_init(&self) -> bool {
        let mut state = self.disk.lock();
        let open = state.store.as_ref().map_or(false, |store| !store.is_closed());
        match state.phase {
            DiskPhase::Initializing => false,
            DiskPhase::Ready if open => false,
            _ => {
                state.phase = DiskPhase::Initializing;
                true
            }
        }
    }

    fn finish_disk_init(&self) {
        let (enabled, path, max_size) = {
            let config = self.config.read();
            (
                config.disk_cache_enabled,
                config.disk_cache_path.clone(),
                config.disk_cache_max_size,
            )
        };

        let store = if enabled {
            self.open_disk_store(path, max_size)
        } else {
            None
        };

        let mut state = self.disk.lock();
        state.store = store;
        state.phase = DiskPhase::Ready;
        self.disk_ready.notify_all();
    }

    fn open_disk_store(&self, path: PathBuf, configured_size: u64) -> Option<Arc<DiskLruCache>> {
        if let Err(e) = std::fs::create_dir_all(&path) {
            warn!(path = %path.display(), error = %e, "Failed to create disk cache directory");
            return None;
        }

        let max_size = match self.space_probe.available_space(&path) {
            Some(available) if available < configured_size => {
                debug!(configured_size, available, "Clamping disk cache size to available space");
                available
            }
            _ => configured_size,
        };

        match DiskLruCache::open(&path, DISK_CACHE_APP_VERSION, DISK_CACHE_VALUE_COUNT, max_size) {
            Ok(store) => {
                debug!(path = %path.display(), max_size, "Initialized disk cache");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open disk cache");
                None
            }
        }
    }

    /// Wait until the disk tier is ready and return it if usable. An
    /// uninitialized tier is initialized by the caller.
    fn disk_store(&self) -> Option<Arc<DiskLruCache>> {
        if !self.config.read().disk_cache_enabled {
            return None;
        }

        let mut state = self.disk.lock();
        loop {
            match state.phase {
                DiskPhase::Ready => {
                    return state.store.clone().filter(|store| !store.is_closed());
                }
                DiskPhase::Initializing => self.disk_ready.wait(&mut state),
                DiskPhase::Uninitialized => {
                    drop(state);
                    self.init_disk_cache();
                    state = self.disk.lock();
                }
            }
        }
    }

    /// Ready disk store without waiting or initializing
    fn current_disk_store(&self) -> Option<Arc<DiskLruCache>> {
        let state = self.disk.lock();
        match state.phase {
            DiskPhase::Ready => state.store.clone(),
            _ => None,
        }
    }

    fn memory_tier(&self) -> Option<Arc<MemoryTier<D::Asset>>> {
        if !self.config.read().memory_cache_enabled {
            return None;
        }
        self.memory.read().clone()
    }

    /// Produce the decoded asset for `uri`, going through the disk tier and
    /// the downloader as needed, and populate the memory tier.
    ///
    /// Blocks while the disk tier is initializing. Returns `None` on any
    /// download or decode failure.
    pub fn fetch(&self, uri: &str, config: &DecodeConfig) -> Option<D::Asset> {
        let downloader = Arc::clone(&self.config.read().downloader);

        let mut meta = None;
        if let Some(store) = self.disk_store() {
            match self.fetch_through_disk(&store, uri, downloader.as_ref()) {
                DiskFetch::Fetched(fetched) => meta = Some(fetched),
                DiskFetch::Fallback => {}
            }
        }
        let meta = match meta {
            Some(meta) => meta,
            None => self.download_to_buffer(uri, downloader.as_ref())?,
        };

        let asset = self.decode(uri, meta.source, config)?;
        self.populate_memory(uri, config, &asset, meta.expiry_timestamp);
        Some(asset)
    }

    /// [`fetch`](Self::fetch) on the tokio blocking pool.
    pub async fn fetch_async(
        self: &Arc<Self>,
        uri: impl Into<String>,
        config: DecodeConfig,
    ) -> Option<D::Asset> {
        let cache = Arc::clone(self);
        let uri = uri.into();
        match tokio::task::spawn_blocking(move || cache.fetch(&uri, &config)).await {
            Ok(asset) => asset,
            Err(e) => {
                warn!(error = %e, "Fetch task failed");
                None
            }
        }
    }

    fn fetch_through_disk(
        &self,
        store: &DiskLruCache,
        uri: &str,
        downloader: &dyn Downloader,
    ) -> DiskFetch {
        match self.open_disk_snapshot(store, uri) {
            Ok(Some(meta)) => {
                self.metrics.record_disk_hit();
                return DiskFetch::Fetched(meta);
            }
            Ok(None) => {}
            Err(()) => return DiskFetch::Fallback,
        }

        let mut editor = match store.edit(uri) {
            Ok(Some(editor)) => editor,
            Ok(None) => {
                debug!(uri, "Disk entry is being written elsewhere, downloading directly");
                return DiskFetch::Fallback;
            }
            Err(e) => {
                warn!(uri, error = %e, "Failed to open disk editor");
                return DiskFetch::Fallback;
            }
        };

        let mut sink = match editor.new_output_stream(DISK_CACHE_INDEX) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(uri, error = %e, "Failed to open disk output stream");
                if let Err(e) = editor.abort() {
                    warn!(uri, error = %e, "Failed to abort disk edit");
                }
                return DiskFetch::Fallback;
            }
        };

        self.metrics.record_download();
        let downloaded = downloader.download_to_stream(uri, &mut sink);
        drop(sink);

        match downloaded {
            Ok(expiry_timestamp) if expiry_timestamp >= 0 => {
                editor.set_entry_expiry_timestamp(expiry_timestamp);
                if let Err(e) = editor.commit() {
                    warn!(uri, error = %e, "Failed to commit disk entry");
                    return DiskFetch::Fallback;
                }
            }
            failed => {
                self.metrics.record_download_failure();
                match failed {
                    Err(e) => warn!(uri, error = %e, "Download failed"),
                    Ok(expiry_timestamp) => warn!(uri, expiry_timestamp, "Download reported failure"),
                }
                if let Err(e) = editor.abort() {
                    warn!(uri, error = %e, "Failed to abort disk edit");
                }
                return DiskFetch::Fallback;
            }
        }

        // decode from the committed copy
        match self.open_disk_snapshot(store, uri) {
            Ok(Some(meta)) => DiskFetch::Fetched(meta),
            _ => DiskFetch::Fallback,
        }
    }

    fn open_disk_snapshot(&self, store: &DiskLruCache, uri: &str) -> Result<Option<FetchMeta>, ()> {
        match store.get(uri) {
            Ok(Some(mut snapshot)) => Ok(snapshot.take_input_stream(DISK_CACHE_INDEX).map(|file| {
                FetchMeta {
                    source: DecodeSource::Stream(file),
                    expiry_timestamp: snapshot.expiry_timestamp(),
                }
            })),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(uri, error = %e, "Failed to read disk entry");
                Err(())
            }
        }
    }

    fn download_to_buffer(&self, uri: &str, downloader: &dyn Downloader) -> Option<FetchMeta> {
        let mut buffer = Vec::new();
        self.metrics.record_download();
        match downloader.download_to_stream(uri, &mut buffer) {
            Ok(expiry_timestamp) if expiry_timestamp >= 0 => Some(FetchMeta {
                source: DecodeSource::Bytes(buffer),
                expiry_timestamp,
            }),
            Ok(expiry_timestamp) => {
                self.metrics.record_download_failure();
                warn!(uri, expiry_timestamp, "Download reported failure");
                None
            }
            Err(e) => {
                self.metrics.record_download_failure();
                warn!(uri, error = %e, "Download failed");
                None
            }
        }
    }

    fn decode(&self, uri: &str, source: DecodeSource, config: &DecodeConfig) -> Option<D::Asset> {
        let decoded = if config.show_original {
            self.decoder.decode_exact(source)
        } else {
            self.decoder
                .decode_bounded(source, config.max_width, config.max_height)
        };
        match decoded {
            Ok(asset) => Some(asset),
            Err(e) => {
                self.metrics.record_decode_failure();
                warn!(uri, config = %config, error = %e, "Failed to decode");
                None
            }
        }
    }

    fn populate_memory(&self, uri: &str, config: &DecodeConfig, asset: &D::Asset, expiry: i64) {
        if let Some(memory) = self.memory_tier() {
            memory.put_if_absent(config.cache_key(uri), asset.clone(), expiry);
        }
    }

    /// Memory tier lookup. Never touches the disk or the network.
    pub fn get_from_memory(&self, uri: &str, config: &DecodeConfig) -> Option<D::Asset> {
        let asset = self.memory_tier()?.get(&config.cache_key(uri))?;
        self.metrics.record_memory_hit();
        Some(asset)
    }

    /// Decode a committed disk entry and populate the memory tier with its
    /// stored expiry. Waits for disk readiness; never downloads.
    pub fn get_from_disk(&self, uri: &str, config: &DecodeConfig) -> Option<D::Asset> {
        let store = self.disk_store()?;
        let meta = self.open_disk_snapshot(&store, uri).ok()??;
        self.metrics.record_disk_hit();

        let expiry = match store.get_expiry_timestamp(uri) {
            Ok(Some(expiry)) => expiry,
            _ => meta.expiry_timestamp,
        };
        let asset = self.decode(uri, meta.source, config)?;
        self.populate_memory(uri, config, &asset, expiry);
        Some(asset)
    }

    /// Drop every memory entry.
    pub fn clear_memory(&self) {
        if let Some(memory) = self.memory.read().as_ref() {
            memory.evict_all();
        }
    }

    /// Drop the memory entry for `uri` under `config`.
    pub fn clear_memory_entry(&self, uri: &str, config: &DecodeConfig) {
        if let Some(memory) = self.memory.read().as_ref() {
            memory.remove(&config.cache_key(uri));
        }
    }

    /// Delete the disk store and everything in it, then reopen it empty.
    /// Disk operations issued meanwhile wait for the reopen.
    pub fn clear_disk(&self) {
        let store = {
            let mut state = self.disk.lock();
            while state.phase == DiskPhase::Initializing {
                self.disk_ready.wait(&mut state);
            }
            state.phase = DiskPhase::Initializing;
            state.store.take()
        };

        if let Some(store) = store {
            match store.delete() {
                Ok(()) => debug!(path = %store.directory().display(), "Cleared disk cache"),
                Err(e) => warn!(error = %e, "Failed to delete disk cache"),
            }
        }
        self.finish_disk_init();
    }

    /// Remove the disk entry for `uri`. An entry being written is left alone.
    pub fn clear_disk_entry(&self, uri: &str) {
        if let Some(store) = self.disk_store() {
            match store.remove(uri) {
                Ok(true) => {}
                Ok(false) => debug!(uri, "No removable disk entry"),
                Err(e) => warn!(uri, error = %e, "Failed to remove disk entry"),
            }
        }
    }

    /// Remove `uri` from both tiers.
    pub fn clear(&self, uri: &str, config: &DecodeConfig) {
        self.clear_memory_entry(uri, config);
        self.clear_disk_entry(uri);
    }

    /// Empty both tiers.
    pub fn clear_all(&self) {
        self.clear_memory();
        self.clear_disk();
    }

    pub fn set_memory_cache_size(&self, max_size: usize) {
        self.config.write().memory_cache_max_size = max_size;
        if let Some(memory) = self.memory.read().as_ref() {
            memory.set_max_size(max_size);
        }
    }

    pub fn set_disk_cache_size(&self, max_size: u64) {
        self.config.write().disk_cache_max_size = max_size;
        if let Some(store) = self.current_disk_store() {
            if let Err(e) = store.set_max_size(max_size) {
                warn!(max_size, error = %e, "Failed to resize disk cache");
            }
        }
    }

    /// Toggling the flag rebuilds the memory tier empty.
    pub fn set_memory_cache_enabled(&self, enabled: bool) {
        let changed = {
            let mut config = self.config.write();
            let changed = config.memory_cache_enabled != enabled;
            config.memory_cache_enabled = enabled;
            changed
        };
        if changed {
            self.init_memory_cache();
        }
    }

    /// A tier that became ready while disabled is opened by the next disk
    /// operation once enabled.
    pub fn set_disk_cache_enabled(&self, enabled: bool) {
        self.config.write().disk_cache_enabled = enabled;
        if enabled {
            let mut state = self.disk.lock();
            if state.phase == DiskPhase::Ready && state.store.is_none() {
                state.phase = DiskPhase::Uninitialized;
            }
        }
    }

    /// Takes effect the next time the disk tier is opened.
    pub fn set_disk_cache_path(&self, path: impl Into<PathBuf>) {
        self.config.write().disk_cache_path = path.into();
    }

    pub fn set_downloader(&self, downloader: Arc<dyn Downloader>) {
        self.config.write().downloader = downloader;
    }

    /// Force pending disk journal records out.
    pub fn flush(&self) {
        if let Some(store) = self.current_disk_store() {
            if let Err(e) = store.flush() {
                warn!(error = %e, "Failed to flush disk cache");
            }
        }
    }

    /// Close the disk tier. It is reopened by the next disk operation.
    pub fn close(&self) {
        let store = {
            let mut state = self.disk.lock();
            while state.phase == DiskPhase::Initializing {
                self.disk_ready.wait(&mut state);
            }
            state.phase = DiskPhase::Uninitialized;
            state.store.take()
        };

        if let Some(store) = store {
            if let Err(e) = store.close() {
                warn!(error = %e, "Failed to close disk cache");
            }
        }
    }

    pub fn stats(&self) -> BitmapCacheStats {
        let store = self.current_disk_store();
        BitmapCacheStats {
            fetch: self.metrics.snapshot(),
            memory: self.memory.read().as_ref().map(|memory| memory.stats()),
            disk_size: store.as_ref().map(|store| store.size()),
            disk_max_size: store.as_ref().map(|store| store.max_size()),
        }
    }
}

impl<D: Decoder> fmt::Debug for BitmapCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapCache")
            .field("config", &*self.config.read())
            .field("disk_phase", &self.disk.lock().phase)
            .finish_non_exhaustive()
    }
}

/// Builder for [`BitmapCache`]
pub struct BitmapCacheBuilder<D: Decoder = ImageDecoder> {
    config: GlobalConfig,
    decoder: D,
    space_probe: Option<Box<dyn SpaceProbe>>,
}

impl BitmapCacheBuilder<ImageDecoder> {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config,
            decoder: ImageDecoder::new(),
            space_probe: None,
        }
    }
}

impl<D: Decoder + 'static> BitmapCacheBuilder<D> {
    /// Use a different decoder
    pub fn decoder<E: Decoder + 'static>(self, decoder: E) -> BitmapCacheBuilder<E> {
        BitmapCacheBuilder {
            config: self.config,
            decoder,
            space_probe: self.space_probe,
        }
    }

    /// Set the free space probe used to clamp the disk tier
    pub fn space_probe(mut self, probe: impl SpaceProbe + 'static) -> Self {
        self.space_probe = Some(Box::new(probe));
        self
    }

    /// Build the cache
    pub fn build(self) -> BitmapCache<D> {
        let space_probe = self
            .space_probe
            .unwrap_or_else(|| Box::new(SystemSpaceProbe::new()));
        BitmapCache::with_parts(self.config, self.decoder, space_probe)
    }
}
