//! Landscapist Image
//!
//! Decoding half of the pipeline: bitmaps, format sniffing, standard and
//! progressive decoders, region (tile) decoding and buffer pooling.

mod bitmap;
mod decoder;
mod error;
pub mod format;
mod png_rows;
mod pool;
mod progressive;
mod region;
mod tile;
mod transform;

pub use bitmap::{Bitmap, PixelFormat};
pub use decoder::{
    DEFAULT_MAX_BITMAP_SIZE, DecodeConfig, DecodedImage, ImageDecoder, PassthroughDecoder, RasterDecoder,
    compute_target_size,
};
pub use error::{DecodeError, RegionDecodeError};
pub use format::ImageFormat;
pub use pool::{BitmapPool, LruBitmapPool, NoopBitmapPool, PoolStats};
pub use progressive::{ProgressiveFrame, ProgressiveFrames};
pub use region::{RasterRegionDecoder, Region, RegionBitmap, RegionDecoder, calculate_sample_size};
pub use tile::{Tile, TileRange, visible_tiles};
pub use transform::{BlurTransformation, GrayscaleTransformation, Transformation, apply_all};
