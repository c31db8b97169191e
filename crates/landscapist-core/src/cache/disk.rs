//! Disk cache
//!
//! Encoded image bytes keyed by [`CacheKey::disk_key`], one file per key.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::CacheKey;

/// Disk cache error
#[derive(Debug, thiserror::Error)]
pub enum DiskCacheError {
    #[error("Disk cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DiskCacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Persistent store of encoded bytes
pub trait DiskCache: Send + Sync {
    /// Cached bytes, or `None` on miss or read failure
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;

    fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), DiskCacheError>;

    /// File backing `key`, if cached
    fn path(&self, key: &CacheKey) -> Option<PathBuf>;

    fn remove(&self, key: &CacheKey) -> bool;

    fn clear(&self);

    /// Total bytes on disk
    fn size(&self) -> u64;

    fn max_size(&self) -> u64;
}

struct Index {
    entries: HashMap<String, (u64, u64)>,
    /// Recency order, oldest first
    order: BTreeMap<u64, String>,
    size: u64,
    next_tick: u64,
}

impl Index {
    fn touch(&mut self, name: &str) {
        self.next_tick += 1;
        let tick = self.next_tick;
        if let Some((_, old_tick)) = self.entries.get_mut(name) {
            self.order.remove(&*old_tick);
            *old_tick = tick;
            self.order.insert(tick, name.to_string());
        }
    }

    fn insert(&mut self, name: String, bytes: u64) {
        self.forget(&name);
        self.next_tick += 1;
        self.entries.insert(name.clone(), (bytes, self.next_tick));
        self.order.insert(self.next_tick, name);
        self.size += bytes;
    }

    fn forget(&mut self, name: &str) -> bool {
        match self.entries.remove(name) {
            Some((bytes, tick)) => {
                self.order.remove(&tick);
                self.size -= bytes;
                true
            }
            None => false,
        }
    }
}

/// [`DiskCache`] over a flat directory, LRU-trimmed to `max_size`
pub struct FileDiskCache {
    dir: PathBuf,
    max_size: u64,
    index: Mutex<Index>,
}

impl FileDiskCache {
    /// Open (creating if needed) a cache directory, indexing existing
    /// entries from oldest to newest modification time
    pub fn open(dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| DiskCacheError::io(&dir, e))?;

        let mut found: Vec<(SystemTime, String, u64)> = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| DiskCacheError::io(&dir, e))? {
            let Ok(entry) = entry else { continue };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_disk_key(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, name, meta.len()));
            }
        }
        found.sort();

        let mut index = Index {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            size: 0,
            next_tick: 0,
        };
        for (_, name, bytes) in found {
            index.insert(name, bytes);
        }
        tracing::info!("Opened disk cache at {} ({} entries, {} bytes)", dir.display(), index.entries.len(), index.size);

        let cache = Self { dir, max_size, index: Mutex::new(index) };
        cache.trim(&mut cache.index.lock());
        Ok(cache)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn trim(&self, index: &mut Index) {
        while index.size > self.max_size {
            let Some(name) = index.order.values().next().cloned() else {
                break;
            };
            index.forget(&name);
            let path = self.file_for(&name);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to evict {}: {}", path.display(), e);
            } else {
                tracing::debug!("Evicted {} from disk cache", name);
            }
        }
    }
}

fn is_disk_key(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl DiskCache for FileDiskCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let name = key.disk_key();
        let mut index = self.index.lock();
        if !index.entries.contains_key(&name) {
            return None;
        }

        let path = self.file_for(&name);
        match fs::read(&path) {
            Ok(data) => {
                index.touch(&name);
                Some(data)
            }
            Err(e) => {
                tracing::warn!("Disk cache read failed for {}: {}", path.display(), e);
                index.forget(&name);
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), DiskCacheError> {
        let bytes = data.len() as u64;
        if bytes > self.max_size {
            tracing::debug!("{} ({} bytes) exceeds disk cache budget", key, bytes);
            return Ok(());
        }

        let name = key.disk_key();
        let path = self.file_for(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let mut index = self.index.lock();
        fs::write(&tmp, data).map_err(|e| DiskCacheError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| DiskCacheError::io(&path, e))?;
        index.insert(name, bytes);
        self.trim(&mut index);
        Ok(())
    }

    fn path(&self, key: &CacheKey) -> Option<PathBuf> {
        let name = key.disk_key();
        let index = self.index.lock();
        index.entries.contains_key(&name).then(|| self.file_for(&name))
    }

    fn remove(&self, key: &CacheKey) -> bool {
        let name = key.disk_key();
        let mut index = self.index.lock();
        if !index.forget(&name) {
            return false;
        }
        let path = self.file_for(&name);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
        true
    }

    fn clear(&self) {
        let mut index = self.index.lock();
        let names: Vec<String> = index.entries.keys().cloned().collect();
        for name in names {
            index.forget(&name);
            let path = self.file_for(&name);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn size(&self) -> u64 {
        self.index.lock().size
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDiskCache::open(dir.path(), 1024).unwrap();
        let key = CacheKey::new("https://example.com/a.png");

        assert!(cache.get(&key).is_none());
        cache.put(&key, b"bytes").unwrap();

        assert_eq!(cache.get(&key), Some(b"bytes".to_vec()));
        assert_eq!(cache.size(), 5);
        let path = cache.path(&key).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), key.disk_key());
    }

    #[test]
    fn test_trims_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDiskCache::open(dir.path(), 10).unwrap();
        let (a, b, c) = (CacheKey::new("a"), CacheKey::new("b"), CacheKey::new("c"));

        cache.put(&a, b"aaaa").unwrap();
        cache.put(&b, b"bbbb").unwrap();
        cache.get(&a);
        cache.put(&c, b"cccc").unwrap();

        assert!(cache.path(&b).is_none());
        assert!(cache.path(&a).is_some());
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new("a");
        {
            let cache = FileDiskCache::open(dir.path(), 1024).unwrap();
            cache.put(&key, b"persisted").unwrap();
        }
        // Stray files are ignored
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let cache = FileDiskCache::open(dir.path(), 1024).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(b"persisted".to_vec()));
    }

    #[test]
    fn test_deleted_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDiskCache::open(dir.path(), 1024).unwrap();
        let key = CacheKey::new("a");
        cache.put(&key, b"data").unwrap();
        fs::remove_file(cache.path(&key).unwrap()).unwrap();

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDiskCache::open(dir.path(), 1024).unwrap();
        cache.put(&CacheKey::new("a"), b"1").unwrap();
        cache.put(&CacheKey::new("b"), b"2").unwrap();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
