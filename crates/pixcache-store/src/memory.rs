//! Size-aware in-memory LRU store.
//!
//! Entries are accounted by a caller-supplied size function rather than a
//! fixed per-entry cost, so the bound is expressed in whatever unit that
//! function returns (bytes for decoded images). All mutation is serialized
//! behind one mutex; recency is tracked by an unbounded [`lru::LruCache`] and
//! the size bound is enforced here.

use std::borrow::Borrow;
use std::hash::Hash;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::current_timestamp_millis;
use crate::metrics::CacheStats;

/// Size function injected at construction
pub type SizeOf<K, V> = dyn Fn(&K, &V) -> usize + Send + Sync;

struct MemoryEntry<V> {
    value: V,
    expiry_timestamp: i64,
    size: usize,
}

struct MemoryInner<K, V> {
    map: LruCache<K, MemoryEntry<V>>,
    size: usize,
    max_size: usize,
    hits: u64,
    misses: u64,
    puts: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Hash + Eq, V> MemoryInner<K, V> {
    fn trim_to_size(&mut self, max_size: usize) {
        while self.size > max_size {
            match self.map.pop_lru() {
                Some((_, evicted)) => {
                    self.size = self.size.saturating_sub(evicted.size);
                    self.evictions += 1;
                    trace!(size = self.size, max_size, "Evicted least recently used entry");
                }
                None => {
                    // accounting drifted; nothing left to evict
                    self.size = 0;
                    break;
                }
            }
        }
    }
}

/// Thread-safe LRU store bounded by total entry size.
pub struct LruMemoryCache<K, V> {
    inner: Mutex<MemoryInner<K, V>>,
    size_of: Box<SizeOf<K, V>>,
}

impl<K, V> LruMemoryCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a store bounded at `max_size`, measuring entries with `size_of`.
    pub fn new<F>(max_size: usize, size_of: F) -> Self
    where
        F: Fn(&K, &V) -> usize + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(MemoryInner {
                map: LruCache::unbounded(),
                size: 0,
                max_size,
                hits: 0,
                misses: 0,
                puts: 0,
                evictions: 0,
                expirations: 0,
            }),
            size_of: Box::new(size_of),
        }
    }

    /// Insert or replace `key`, then evict least recently used entries until
    /// the total size fits. Returns the replaced value, if any.
    pub fn put(&self, key: K, value: V, expiry_timestamp: i64) -> Option<V> {
        let size = (self.size_of)(&key, &value);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.puts += 1;
        inner.size = inner.size.saturating_add(size);
        let previous = inner.map.put(
            key,
            MemoryEntry {
                value,
                expiry_timestamp,
                size,
            },
        );
        if let Some(previous) = &previous {
            inner.size = inner.size.saturating_sub(previous.size);
        }

        let max_size = inner.max_size;
        inner.trim_to_size(max_size);
        previous.map(|entry| entry.value)
    }

    /// Insert `key` only if no live entry exists for it. Returns whether the
    /// value was inserted.
    pub fn put_if_absent(&self, key: K, value: V, expiry_timestamp: i64) -> bool {
        let size = (self.size_of)(&key, &value);
        let now = current_timestamp_millis();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let live = inner
            .map
            .peek(&key)
            .map_or(false, |entry| entry.expiry_timestamp >= now);
        if live {
            return false;
        }

        inner.puts += 1;
        inner.size = inner.size.saturating_add(size);
        if let Some(stale) = inner.map.put(
            key,
            MemoryEntry {
                value,
                expiry_timestamp,
                size,
            },
        ) {
            inner.size = inner.size.saturating_sub(stale.size);
        }
        let max_size = inner.max_size;
        inner.trim_to_size(max_size);
        true
    }

    /// Return the value for `key` and mark it most recently used.
    ///
    /// An entry whose expiry timestamp has passed is dropped and reported as
    /// a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = current_timestamp_millis();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let lookup = inner
            .map
            .get(key)
            .map(|entry| (entry.expiry_timestamp < now, entry.value.clone()));

        match lookup {
            Some((false, value)) => {
                inner.hits += 1;
                Some(value)
            }
            Some((true, _)) => {
                if let Some(expired) = inner.map.pop(key) {
                    inner.size = inner.size.saturating_sub(expired.size);
                }
                inner.expirations += 1;
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether a live (unexpired) entry exists, without touching recency.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = current_timestamp_millis();
        self.inner
            .lock()
            .map
            .peek(key)
            .map_or(false, |entry| entry.expiry_timestamp >= now)
    }

    /// Return the value for `key` without touching recency or expiry.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().map.peek(key).map(|entry| entry.value.clone())
    }

    /// Stored expiry timestamp for `key`
    pub fn expiry_timestamp<Q>(&self, key: &Q) -> Option<i64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .lock()
            .map
            .peek(key)
            .map(|entry| entry.expiry_timestamp)
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let removed = inner.map.pop(key)?;
        inner.size = inner.size.saturating_sub(removed.size);
        Some(removed.value)
    }

    /// Drop every entry.
    pub fn evict_all(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.evictions += inner.map.len() as u64;
        inner.map.clear();
        inner.size = 0;
    }

    /// Change the bound, evicting immediately if now over it.
    pub fn set_max_size(&self, max_size: usize) {
        let mut guard = self.inner.lock();
        guard.max_size = max_size;
        guard.trim_to_size(max_size);
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys ordered from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .map
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of counters and sizes
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            puts: inner.puts,
            evictions: inner.evictions,
            expirations: inner.expirations,
            size: inner.size as u64,
            max_size: inner.max_size as u64,
            entry_count: inner.map.len(),
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for LruMemoryCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruMemoryCache")
            .field("size", &inner.size)
            .field("max_size", &inner.max_size)
            .field("entries", &inner.map.len())
            .finish()
    }
}
