//! Two-tier memory cache
//!
//! A byte-bounded LRU of decoded images (the strong tier) backed by an
//! overflow of `Weak` references to evicted bitmaps. A weak entry stays
//! retrievable for as long as some caller still holds the bitmap.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use landscapist_image::Bitmap;
use landscapist_net::DataSource;
use parking_lot::Mutex;

use super::CachedImage;
use crate::CacheKey;

struct StrongEntry {
    image: CachedImage,
    tick: u64,
}

/// Dead weak entries are swept once the weak tier reaches this many keys
const WEAK_SWEEP_MIN: usize = 64;

struct WeakEntry {
    bitmap: Weak<Bitmap>,
    data_source: DataSource,
    size_bytes: u64,
    original_size: (u32, u32),
}

impl WeakEntry {
    fn from_image(image: &CachedImage) -> Self {
        Self {
            bitmap: Arc::downgrade(&image.bitmap),
            data_source: image.data_source,
            size_bytes: image.size_bytes,
            original_size: (image.original_width, image.original_height),
        }
    }

    fn is_live(&self) -> bool {
        self.bitmap.strong_count() > 0
    }

    fn upgrade(&self) -> Option<CachedImage> {
        let bitmap = self.bitmap.upgrade()?;
        let (width, height) = self.original_size;
        Some(CachedImage::with_size(bitmap, self.data_source, self.size_bytes).with_original_size(width, height))
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub weak_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub size: u64,
    pub max_size: u64,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.weak_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.weak_hits) as f64 / total as f64
        }
    }
}

struct Inner {
    strong: HashMap<CacheKey, StrongEntry>,
    /// Recency order, oldest first
    order: BTreeMap<u64, CacheKey>,
    weak: HashMap<CacheKey, WeakEntry>,
    /// Weak-tier length that triggers the next sweep
    weak_sweep_at: usize,
    size: u64,
    max_size: u64,
    next_tick: u64,
    stats: MemoryCacheStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, key: &CacheKey) -> Option<CachedImage> {
        let tick = self.tick();
        let entry = self.strong.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(entry.image.clone())
    }

    fn remove_strong(&mut self, key: &CacheKey) -> Option<CachedImage> {
        let entry = self.strong.remove(key)?;
        self.order.remove(&entry.tick);
        self.size -= entry.image.size_bytes;
        Some(entry.image)
    }

    fn insert(&mut self, key: CacheKey, image: CachedImage, weak_enabled: bool) {
        self.remove_strong(&key);
        self.weak.remove(&key);

        if image.size_bytes > self.max_size {
            tracing::debug!("{} ({} bytes) exceeds memory cache budget", key, image.size_bytes);
            if weak_enabled {
                self.demote(key, &image);
            }
            return;
        }

        let tick = self.tick();
        self.size += image.size_bytes;
        self.order.insert(tick, key.clone());
        self.strong.insert(key, StrongEntry { image, tick });
        self.trim(self.max_size, weak_enabled);
    }

    fn evict_oldest(&mut self, weak_enabled: bool) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        let Some(entry) = self.strong.remove(&key) else {
            return false;
        };
        self.size -= entry.image.size_bytes;
        self.stats.evictions += 1;
        tracing::debug!("Evicted {} ({} bytes)", key, entry.image.size_bytes);
        if weak_enabled {
            self.demote(key, &entry.image);
        }
        true
    }

    /// Move `image` into the weak tier, sweeping reclaimed entries once the
    /// tier has doubled since the last sweep
    fn demote(&mut self, key: CacheKey, image: &CachedImage) {
        self.weak.insert(key, WeakEntry::from_image(image));
        if self.weak.len() >= self.weak_sweep_at {
            self.sweep_weak();
        }
    }

    fn sweep_weak(&mut self) {
        let before = self.weak.len();
        self.weak.retain(|_, entry| entry.is_live());
        self.weak_sweep_at = (self.weak.len() * 2).max(WEAK_SWEEP_MIN);
        if before > self.weak.len() {
            tracing::debug!("Swept {} reclaimed weak entries", before - self.weak.len());
        }
    }

    fn trim(&mut self, target: u64, weak_enabled: bool) {
        while self.size > target {
            if !self.evict_oldest(weak_enabled) {
                break;
            }
        }
    }
}

/// Byte-bounded LRU of decoded images with a weak overflow tier
pub struct MemoryCache {
    inner: Mutex<Inner>,
    weak_references_enabled: bool,
}

impl MemoryCache {
    pub fn new(max_size: u64, weak_references_enabled: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                strong: HashMap::new(),
                order: BTreeMap::new(),
                weak: HashMap::new(),
                weak_sweep_at: WEAK_SWEEP_MIN,
                size: 0,
                max_size,
                next_tick: 0,
                stats: MemoryCacheStats::default(),
            }),
            weak_references_enabled,
        }
    }

    /// Look up `key`, promoting a live weak entry back into the strong tier
    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.inner.lock();
        if let Some(image) = inner.touch(key) {
            inner.stats.hits += 1;
            return Some(image);
        }

        if let Some(weak) = inner.weak.remove(key) {
            if let Some(image) = weak.upgrade() {
                inner.stats.weak_hits += 1;
                tracing::debug!("Promoted {} from weak tier", key);
                inner.insert(key.clone(), image.clone(), self.weak_references_enabled);
                return Some(image);
            }
        }

        inner.stats.misses += 1;
        None
    }

    /// Insert or replace `key`, evicting least recently used entries
    pub fn set(&self, key: CacheKey, image: CachedImage) {
        self.inner.lock().insert(key, image, self.weak_references_enabled);
    }

    /// Remove from both tiers; true if present in either
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock();
        let strong = inner.remove_strong(key).is_some();
        let weak = inner.weak.remove(key).is_some();
        strong || weak
    }

    /// Evict oldest entries until `size <= target`
    pub fn trim_to_size(&self, target: u64) {
        self.inner.lock().trim(target, self.weak_references_enabled);
    }

    pub fn resize(&self, max_size: u64) {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        inner.trim(max_size, self.weak_references_enabled);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.strong.clear();
        inner.order.clear();
        inner.weak.clear();
        inner.weak_sweep_at = WEAK_SWEEP_MIN;
        inner.size = 0;
    }

    /// Present in either tier, without touching recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.inner.lock();
        inner.strong.contains_key(key) || inner.weak.get(key).is_some_and(WeakEntry::is_live)
    }

    /// Strong-tier entry count
    pub fn len(&self) -> usize {
        self.inner.lock().strong.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by the strong tier
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn max_size(&self) -> u64 {
        self.inner.lock().max_size
    }

    /// Live weak entries; dead ones are purged
    pub fn weak_len(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.sweep_weak();
        inner.weak.len()
    }

    pub fn weak_references_enabled(&self) -> bool {
        self.weak_references_enabled
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let inner = self.inner.lock();
        MemoryCacheStats {
            entry_count: inner.strong.len(),
            size: inner.size,
            max_size: inner.max_size,
            ..inner.stats
        }
    }
}
