//! Region decoding
//!
//! Decodes sub-rectangles of very large images at a power-of-two sample
//! size, so a tiled renderer only hands out the pixels it shows and never
//! keeps more than a bounded copy of the source.

use std::io::Cursor;
use std::sync::Arc;

use image::RgbaImage;
use image::imageops::{self, FilterType};
use parking_lot::Mutex;

use crate::bitmap::Bitmap;
use crate::decoder::{DEFAULT_MAX_BITMAP_SIZE, RasterDecoder};
use crate::error::{DecodeError, RegionDecodeError};
use crate::format::{self, ImageFormat};
use crate::png_rows::PngRows;
use crate::pool::BitmapPool;

/// Pixel rectangle; `right` and `bottom` are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Region {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersect with `[0, width) x [0, height)`
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            left: self.left.min(width),
            top: self.top.min(height),
            right: self.right.min(width),
            bottom: self.bottom.min(height),
        }
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.left < other.right && other.left < self.right && self.top < other.bottom && other.top < self.bottom
    }
}

/// A decoded region
#[derive(Debug, Clone)]
pub struct RegionBitmap {
    pub bitmap: Bitmap,
    /// The region actually decoded, after clamping
    pub region: Region,
    pub sample_size: u32,
}

/// Largest power-of-two sample size that keeps the sampled region at least
/// as large as the requested output on both axes.
pub fn calculate_sample_size(region_width: u32, region_height: u32, target_width: u32, target_height: u32) -> u32 {
    let mut sample_size = 1u32;
    if target_width == 0 || target_height == 0 {
        return sample_size;
    }
    while let Some(next) = sample_size.checked_mul(2) {
        if region_width / next < target_width || region_height / next < target_height {
            break;
        }
        sample_size = next;
    }
    sample_size
}

/// Round down to a power of two, minimum 1
fn normalize_sample_size(sample_size: u32) -> u32 {
    if sample_size <= 1 {
        1
    } else {
        1 << (u32::BITS - 1 - sample_size.leading_zeros())
    }
}

/// Decodes sub-rectangles of one encoded image
pub trait RegionDecoder: Send + Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn decode_region(&self, region: Region, sample_size: u32) -> Result<RegionBitmap, RegionDecodeError>;

    /// Release decoder resources; later calls fail with `Recycled`
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Region decoder backed by the png and image crates
///
/// Non-interlaced PNGs are streamed row by row on every request, averaging
/// each `sample_size` block as rows arrive and stopping after the region's
/// last row; no full-image buffer is ever held. Other formats are decoded
/// once, on the first request, and kept at the largest power-of-two
/// downsample that fits the `max_bitmap_size` budget until `close`.
pub struct RasterRegionDecoder {
    data: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
    streams_rows: bool,
    /// Largest retained source copy, in bytes
    max_source_bytes: u64,
    pool: Arc<dyn BitmapPool>,
    state: Mutex<SourceState>,
}

enum SourceState {
    Encoded,
    /// Whole image shrunk by `scale` on both axes
    Decoded { image: RgbaImage, scale: u32 },
    Closed,
}

impl RasterRegionDecoder {
    /// Read the header of `data`; pixels are decoded lazily
    pub fn new(data: Vec<u8>, pool: Arc<dyn BitmapPool>) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let format = ImageFormat::from_bytes(&data);
        if !format.supports_region_decode() {
            return Err(DecodeError::UnsupportedFormat);
        }
        let (width, height) = format::read_dimensions(&data)
            .ok_or_else(|| DecodeError::Malformed("unreadable header".into()))?;
        let streams_rows = format == ImageFormat::Png && !format::is_interlaced_png(&data);

        Ok(Self {
            data,
            format,
            width,
            height,
            streams_rows,
            max_source_bytes: source_budget(DEFAULT_MAX_BITMAP_SIZE),
            pool,
            state: Mutex::new(SourceState::Encoded),
        })
    }

    /// Cap any retained decoded copy at `max * max` pixels
    pub fn with_max_bitmap_size(mut self, max: u32) -> Self {
        self.max_source_bytes = source_budget(max);
        self
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    fn check_buffer(region: Region, reuse: &Option<Vec<u8>>, required: usize) -> Result<(), RegionDecodeError> {
        match reuse {
            Some(buffer) if buffer.capacity() < required => Err(RegionDecodeError::IncompatibleBuffer {
                region,
                capacity: buffer.capacity(),
                required,
            }),
            _ => Ok(()),
        }
    }

    /// Box-average `region` into `out_width x out_height` straight from
    /// the PNG row stream
    fn stream_png(
        &self,
        region: Region,
        sample_size: u32,
        out_width: u32,
        out_height: u32,
        reuse: Option<Vec<u8>>,
    ) -> Result<Bitmap, RegionDecodeError> {
        let required = out_width as usize * out_height as usize * 4;
        Self::check_buffer(region, &reuse, required)?;
        let fail = |source: DecodeError| RegionDecodeError::Decode { region, source };

        let mut rows = PngRows::open(Cursor::new(self.data.as_slice())).map_err(fail)?;
        let mut pixels = reuse.unwrap_or_default();
        pixels.clear();
        let mut sums = vec![0u64; out_width as usize * 4];
        let mut counts = vec![0u64; out_width as usize];
        let mut out_y = 0;
        let mut row = Vec::new();

        while let Some(position) = rows.next_row(&mut row).map_err(fail)? {
            if position.y < region.top {
                continue;
            }
            if position.y >= region.bottom {
                break;
            }
            // Trailing rows and columns fold into the last block
            let y = ((position.y - region.top) / sample_size).min(out_height - 1);
            if y != out_y {
                flush_blocks(&mut sums, &mut counts, &mut pixels);
                out_y = y;
            }
            for x in region.left..region.right {
                let block = ((x - region.left) / sample_size).min(out_width - 1) as usize;
                let src = x as usize * 4;
                for (sum, &channel) in sums[block * 4..block * 4 + 4].iter_mut().zip(&row[src..src + 4]) {
                    *sum += u64::from(channel);
                }
                counts[block] += 1;
            }
        }
        flush_blocks(&mut sums, &mut counts, &mut pixels);

        if pixels.len() != required {
            return Err(fail(DecodeError::Malformed("PNG ended inside the region".into())));
        }
        Ok(Bitmap::from_rgba(pixels, out_width, out_height))
    }

    /// Decode the whole image, shrinking it until it fits the budget
    fn decode_source(&self, region: Region) -> Result<SourceState, RegionDecodeError> {
        let decoded = RasterDecoder::load(&self.data, None)
            .map_err(|source| RegionDecodeError::Decode { region, source })?
            .into_rgba8();

        let mut scale = 1u32;
        while scale < 1 << 16 && u64::from(self.width / scale) * u64::from(self.height / scale) * 4 > self.max_source_bytes {
            scale *= 2;
        }
        if scale == 1 {
            return Ok(SourceState::Decoded { image: decoded, scale });
        }

        let (width, height) = ((self.width / scale).max(1), (self.height / scale).max(1));
        tracing::debug!(
            "Keeping {}x{} region source at 1/{} ({}x{})",
            self.width,
            self.height,
            scale,
            width,
            height
        );
        let image = imageops::resize(&decoded, width, height, FilterType::Triangle);
        Ok(SourceState::Decoded { image, scale })
    }

    fn render(
        source: &RgbaImage,
        scale: u32,
        region: Region,
        out_width: u32,
        out_height: u32,
        reuse: Option<Vec<u8>>,
    ) -> Result<Bitmap, RegionDecodeError> {
        let required = out_width as usize * out_height as usize * 4;
        Self::check_buffer(region, &reuse, required)?;

        // Map the region onto the retained copy, keeping at least one pixel
        let left = (region.left / scale).min(source.width() - 1);
        let top = (region.top / scale).min(source.height() - 1);
        let right = region.right.div_ceil(scale).clamp(left + 1, source.width());
        let bottom = region.bottom.div_ceil(scale).clamp(top + 1, source.height());

        let cropped = imageops::crop_imm(source, left, top, right - left, bottom - top).to_image();
        let rendered = if cropped.dimensions() == (out_width, out_height) {
            cropped
        } else {
            imageops::resize(&cropped, out_width, out_height, FilterType::Triangle)
        };

        let mut pixels = reuse.unwrap_or_default();
        pixels.clear();
        pixels.extend_from_slice(rendered.as_raw());
        Ok(Bitmap::from_rgba(pixels, out_width, out_height))
    }
}

fn source_budget(max_bitmap_size: u32) -> u64 {
    u64::from(max_bitmap_size.max(1)).pow(2) * 4
}

/// Append one output row of block averages and reset the accumulators
fn flush_blocks(sums: &mut [u64], counts: &mut [u64], pixels: &mut Vec<u8>) {
    for (block, count) in counts.iter_mut().enumerate() {
        let n = (*count).max(1);
        for sum in &mut sums[block * 4..block * 4 + 4] {
            pixels.push(((*sum + n / 2) / n) as u8);
            *sum = 0;
        }
        *count = 0;
    }
}

impl RegionDecoder for RasterRegionDecoder {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn decode_region(&self, region: Region, sample_size: u32) -> Result<RegionBitmap, RegionDecodeError> {
        let mut state = self.state.lock();

        if matches!(*state, SourceState::Closed) {
            return Err(RegionDecodeError::Recycled { region });
        }

        let clamped = region.clamp_to(self.width, self.height);
        if clamped.is_empty() {
            return Err(RegionDecodeError::InvalidRegion {
                region,
                width: self.width,
                height: self.height,
            });
        }

        let sample_size = normalize_sample_size(sample_size);
        let out_width = (clamped.width() / sample_size).max(1);
        let out_height = (clamped.height() / sample_size).max(1);
        let reuse = self.pool.get(out_width, out_height);

        let bitmap = if self.streams_rows {
            drop(state);
            match self.stream_png(clamped, sample_size, out_width, out_height, reuse) {
                Err(RegionDecodeError::IncompatibleBuffer { capacity, required, .. }) => {
                    tracing::debug!("Pooled buffer too small ({} < {}), retrying without reuse", capacity, required);
                    self.stream_png(clamped, sample_size, out_width, out_height, None)?
                }
                other => other?,
            }
        } else {
            if matches!(*state, SourceState::Encoded) {
                *state = self.decode_source(clamped)?;
            }
            let SourceState::Decoded { image, scale } = &*state else {
                return Err(RegionDecodeError::Recycled { region });
            };
            match Self::render(image, *scale, clamped, out_width, out_height, reuse) {
                Err(RegionDecodeError::IncompatibleBuffer { capacity, required, .. }) => {
                    tracing::debug!("Pooled buffer too small ({} < {}), retrying without reuse", capacity, required);
                    Self::render(image, *scale, clamped, out_width, out_height, None)?
                }
                other => other?,
            }
        };

        Ok(RegionBitmap {
            bitmap,
            region: clamped,
            sample_size,
        })
    }

    fn close(&self) {
        *self.state.lock() = SourceState::Closed;
    }

    fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), SourceState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NoopBitmapPool;

    fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| image::Rgba([(x * 10) as u8, (y * 20) as u8, 7, 255]));
        let mut out = Cursor::new(Vec::new());
        let written = match format {
            image::ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(image).to_rgb8().write_to(&mut out, format),
            _ => image.write_to(&mut out, format),
        };
        written.unwrap();
        out.into_inner()
    }

    fn decoder(data: Vec<u8>) -> RasterRegionDecoder {
        RasterRegionDecoder::new(data, Arc::new(NoopBitmapPool)).unwrap()
    }

    #[test]
    fn test_png_rows_match_full_decode_without_retaining_source() {
        let data = encode(24, 20, image::ImageFormat::Png);
        let full = RasterDecoder::load(&data, None).unwrap().into_rgba8();
        let decoder = decoder(data);

        let result = decoder.decode_region(Region::new(3, 5, 17, 19), 1).unwrap();
        assert_eq!((result.bitmap.width(), result.bitmap.height()), (14, 14));
        for (x, y) in [(0, 0), (13, 0), (6, 9), (13, 13)] {
            assert_eq!(result.bitmap.get_pixel(x, y), Some(full.get_pixel(x + 3, y + 5).0));
        }
        assert!(matches!(*decoder.state.lock(), SourceState::Encoded));
    }

    #[test]
    fn test_png_rows_average_blocks() {
        let decoder = decoder(encode(8, 4, image::ImageFormat::Png));

        // Red is 10x: columns [0, 10] and [20, 30, 40], the odd one folded in
        let result = decoder.decode_region(Region::new(0, 0, 5, 2), 2).unwrap();
        assert_eq!((result.bitmap.width(), result.bitmap.height()), (2, 1));
        // Green is 20y over rows 0 and 1
        assert_eq!(result.bitmap.get_pixel(0, 0), Some([5, 10, 7, 255]));
        assert_eq!(result.bitmap.get_pixel(1, 0), Some([30, 10, 7, 255]));
    }

    #[test]
    fn test_retained_source_fits_budget() {
        let decoder = decoder(encode(256, 256, image::ImageFormat::Jpeg)).with_max_bitmap_size(64);

        let result = decoder.decode_region(Region::new(0, 0, 128, 128), 2).unwrap();
        assert_eq!((result.bitmap.width(), result.bitmap.height()), (64, 64));
        match &*decoder.state.lock() {
            SourceState::Decoded { image, scale } => {
                assert_eq!(*scale, 4);
                assert_eq!(image.dimensions(), (64, 64));
            }
            _ => panic!("expected a retained source"),
        }

        // Regions off the retained grid still come out at the requested size
        let odd = decoder.decode_region(Region::new(3, 3, 13, 9), 1).unwrap();
        assert_eq!((odd.bitmap.width(), odd.bitmap.height()), (10, 6));
    }

    #[test]
    fn test_sample_size_calculation() {
        assert_eq!(calculate_sample_size(1000, 1000, 250, 250), 4);
        assert_eq!(calculate_sample_size(1000, 1000, 251, 251), 2);
        assert_eq!(calculate_sample_size(1000, 1000, 1000, 1000), 1);
        assert_eq!(calculate_sample_size(4000, 1000, 100, 500), 2);
        assert_eq!(calculate_sample_size(100, 100, 0, 0), 1);
    }

    #[test]
    fn test_sample_size_near_u32_max() {
        assert_eq!(calculate_sample_size(u32::MAX, u32::MAX, 1, 1), 1 << 31);
        assert_eq!(calculate_sample_size(u32::MAX, 1, 1, 1), 1);
    }

    #[test]
    fn test_normalize_sample_size() {
        assert_eq!(normalize_sample_size(0), 1);
        assert_eq!(normalize_sample_size(3), 2);
        assert_eq!(normalize_sample_size(8), 8);
    }

    #[test]
    fn test_region_clamp() {
        let region = Region::new(900, 900, 1200, 1100).clamp_to(1000, 1000);
        assert_eq!(region, Region::new(900, 900, 1000, 1000));
        assert!(Region::new(1000, 0, 1200, 10).clamp_to(1000, 1000).is_empty());
    }

    #[test]
    fn test_region_intersects() {
        let a = Region::new(0, 0, 10, 10);
        assert!(a.intersects(&Region::new(5, 5, 15, 15)));
        assert!(!a.intersects(&Region::new(10, 0, 20, 10)));
    }
}
