//! Bitmap Memory Pool
//!
//! Reuses pixel buffers to reduce allocations during region decoding. A pool
//! miss is never an error: callers fall back to a fresh allocation.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Source of reusable pixel buffers
pub trait BitmapPool: Send + Sync {
    /// A buffer that may be reused for a `width` x `height` RGBA bitmap.
    /// Its capacity is a hint; callers must verify it.
    fn get(&self, width: u32, height: u32) -> Option<Vec<u8>>;

    /// Offer a buffer back to the pool
    fn put(&self, buffer: Vec<u8>);

    /// Drop every pooled buffer
    fn clear(&self);
}

/// Pool that never retains anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBitmapPool;

impl BitmapPool for NoopBitmapPool {
    fn get(&self, _width: u32, _height: u32) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _buffer: Vec<u8>) {}

    fn clear(&self) {}
}

/// Size bucket: buffers are grouped by capacity rounded to a power of two
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SizeBucket(usize);

impl SizeBucket {
    /// Bucket to search when `bytes` are needed
    fn for_request(bytes: usize) -> Self {
        Self(bytes.max(1).next_power_of_two())
    }

    /// Bucket a buffer of `capacity` belongs to; every buffer in a bucket
    /// holds at least the bucket's size.
    fn for_capacity(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self(1usize << (usize::BITS - 1 - capacity.leading_zeros())))
    }
}

/// Bucketed, byte-bounded pool of RGBA buffers
pub struct LruBitmapPool {
    inner: Mutex<PoolState>,
    /// Maximum buffers per bucket
    max_per_bucket: usize,
    /// Maximum total bytes
    max_bytes: usize,
}

struct PoolState {
    pools: HashMap<SizeBucket, Vec<Vec<u8>>>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
}

impl Default for LruBitmapPool {
    fn default() -> Self {
        Self::new(8, 32 * 1024 * 1024) // 32 MB default limit
    }
}

impl LruBitmapPool {
    pub fn new(max_per_bucket: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(PoolState {
                pools: HashMap::new(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
            max_per_bucket,
            max_bytes,
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            total_bytes: state.total_bytes,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if state.hits + state.misses > 0 {
                state.hits as f64 / (state.hits + state.misses) as f64
            } else {
                0.0
            },
            num_buckets: state.pools.len(),
            num_buffers: state.pools.values().map(|p| p.len()).sum(),
        }
    }
}

impl BitmapPool for LruBitmapPool {
    fn get(&self, width: u32, height: u32) -> Option<Vec<u8>> {
        let bucket = SizeBucket::for_request(width as usize * height as usize * 4);
        let mut state = self.inner.lock();

        if let Some(buffer) = state.pools.get_mut(&bucket).and_then(Vec::pop) {
            state.hits += 1;
            state.total_bytes -= buffer.capacity();
            return Some(buffer);
        }

        state.misses += 1;
        None
    }

    fn put(&self, mut buffer: Vec<u8>) {
        let Some(bucket) = SizeBucket::for_capacity(buffer.capacity()) else {
            return;
        };
        let bytes = buffer.capacity();
        let mut state = self.inner.lock();

        // Check capacity limits
        if state.total_bytes + bytes > self.max_bytes {
            return; // Drop the buffer
        }

        let pool = state.pools.entry(bucket).or_default();
        if pool.len() >= self.max_per_bucket {
            return; // Drop the buffer
        }

        buffer.clear();
        pool.push(buffer);
        state.total_bytes += bytes;
    }

    fn clear(&self) {
        let mut state = self.inner.lock();
        state.pools.clear();
        state.total_bytes = 0;
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub num_buckets: usize,
    pub num_buffers: usize,
}
