//! Image caches

mod disk;
mod memory;

use std::sync::Arc;

use landscapist_image::Bitmap;
use landscapist_net::DataSource;

pub use disk::{DiskCache, DiskCacheError, FileDiskCache};
pub use memory::{MemoryCache, MemoryCacheStats};

/// Decoded image held by the memory cache
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub bitmap: Arc<Bitmap>,
    pub data_source: DataSource,
    pub size_bytes: u64,
    /// Source dimensions before scaling and transformations
    pub original_width: u32,
    pub original_height: u32,
}

impl CachedImage {
    /// Sized by the bitmap's pixel buffer
    pub fn new(bitmap: Arc<Bitmap>, data_source: DataSource) -> Self {
        let size_bytes = bitmap.byte_size() as u64;
        Self::with_size(bitmap, data_source, size_bytes)
    }

    pub fn with_size(bitmap: Arc<Bitmap>, data_source: DataSource, size_bytes: u64) -> Self {
        let (original_width, original_height) = (bitmap.width(), bitmap.height());
        Self {
            bitmap,
            data_source,
            size_bytes,
            original_width,
            original_height,
        }
    }

    /// Record the source size when the bitmap was scaled or transformed
    pub fn with_original_size(mut self, width: u32, height: u32) -> Self {
        self.original_width = width;
        self.original_height = height;
        self
    }
}
