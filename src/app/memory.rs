//! Bounded in-memory bitmap cache
//!
//! LRU mapping from cache key to decoded bitmap. Write-through only from the
//! fetch controller; callers never write to it directly. Hit/miss counters are
//! exposed so tests can observe that a memory hit touches neither network nor
//! disk.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::app::request::Bitmap;
use crate::constants::memory;

/// Bounded key -> bitmap cache with LRU eviction
pub struct MemoryCache {
    cache: RwLock<LruCache<String, Arc<Bitmap>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` decoded bitmaps
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(memory::DEFAULT_CAPACITY)
    }

    /// Look up a decoded bitmap, promoting it in the LRU order
    pub async fn get(&self, cache_key: &str) -> Option<Arc<Bitmap>> {
        let mut cache = self.cache.write().await;
        if let Some(bitmap) = cache.get(cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %cache_key, "memory cache hit");
            Some(Arc::clone(bitmap))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %cache_key, "memory cache miss");
            None
        }
    }

    /// Store a decoded bitmap, evicting the least recently used if full
    pub async fn put(&self, cache_key: String, bitmap: Arc<Bitmap>) {
        let mut cache = self.cache.write().await;
        debug!(key = %cache_key, "caching bitmap in memory");
        cache.put(cache_key, bitmap);
    }

    /// Number of bitmaps currently cached
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Drop every cached bitmap
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        debug!("cleared memory cache");
    }

    /// Hit/miss statistics since construction
    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Counters for memory cache effectiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl MemoryCacheStats {
    /// Hit rate as a percentage, 0.0 when no lookups happened
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
