//! Image decoders
//!
//! [`ImageDecoder`] is the seam between the pipeline and whatever turns
//! bytes into pixels. [`RasterDecoder`] decodes PNG, JPEG, GIF and WebP via
//! the image crate; [`PassthroughDecoder`] only reads headers, for hosts
//! whose UI layer decodes on its own.

use std::io::Cursor;

use image::{DynamicImage, ImageReader};

use crate::bitmap::{Bitmap, bitmap_from_dynamic};
use crate::error::DecodeError;
use crate::format::{self, ImageFormat};
use crate::progressive::ProgressiveFrames;

/// Largest bitmap edge, in pixels, a decode may produce by default
pub const DEFAULT_MAX_BITMAP_SIZE: u32 = 4096;

/// Per-decode options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Neither output dimension may exceed this
    pub max_bitmap_size: u32,
    /// Store opaque images as RGB565
    pub allow_rgb565: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_bitmap_size: DEFAULT_MAX_BITMAP_SIZE,
            allow_rgb565: false,
        }
    }
}

/// Result of a standard decode
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bitmap: Bitmap,
    /// Output width after scaling
    pub width: u32,
    /// Output height after scaling
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub is_animated: bool,
}

/// Turns encoded bytes into a [`Bitmap`]
pub trait ImageDecoder: Send + Sync {
    /// Decode the whole image, downscaling to fit the target and
    /// `config.max_bitmap_size`.
    fn decode(
        &self,
        data: &[u8],
        mime_type: Option<&str>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: &DecodeConfig,
    ) -> Result<DecodedImage, DecodeError>;

    /// Decode as a lazy sequence of frames. The default emits the standard
    /// decode as the single terminal frame.
    fn decode_progressive(
        &self,
        data: Vec<u8>,
        mime_type: Option<String>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: DecodeConfig,
    ) -> ProgressiveFrames {
        let result = self.decode(&data, mime_type.as_deref(), target_width, target_height, &config);
        ProgressiveFrames::single(result)
    }
}

/// Output size for an `original` image given optional targets and a maximum
/// edge. Never upscales; returns the original size when it already fits.
pub fn compute_target_size(
    original_width: u32,
    original_height: u32,
    target_width: Option<u32>,
    target_height: Option<u32>,
    max_bitmap_size: u32,
) -> (u32, u32) {
    if original_width == 0 || original_height == 0 {
        return (original_width, original_height);
    }

    let ow = original_width as f64;
    let oh = original_height as f64;

    let mut ratio: f64 = match (target_width, target_height) {
        (Some(tw), Some(th)) => (tw as f64 / ow).min(th as f64 / oh),
        (Some(tw), None) => tw as f64 / ow,
        (None, Some(th)) => th as f64 / oh,
        (None, None) => 1.0,
    };
    ratio = ratio.min(1.0);

    let max = max_bitmap_size.max(1) as f64;
    if ow * ratio > max || oh * ratio > max {
        ratio = ratio.min(max / ow).min(max / oh);
    }

    if ratio >= 1.0 {
        return (original_width, original_height);
    }

    let width = ((ow * ratio).round() as u32).clamp(1, max_bitmap_size.max(1));
    let height = ((oh * ratio).round() as u32).clamp(1, max_bitmap_size.max(1));
    (width, height)
}

/// Decoder backed by the image crate
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterDecoder;

impl RasterDecoder {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn load(data: &[u8], mime_type: Option<&str>) -> Result<DynamicImage, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let format = format::detect_format(data, mime_type);
        let img_format = format.to_image_format().ok_or(DecodeError::UnsupportedFormat)?;

        let mut reader = ImageReader::new(Cursor::new(data));
        reader.set_format(img_format);
        Ok(reader.decode()?)
    }

    pub(crate) fn scale(
        image: DynamicImage,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: &DecodeConfig,
    ) -> DynamicImage {
        let (ow, oh) = (image.width(), image.height());
        let (width, height) =
            compute_target_size(ow, oh, target_width, target_height, config.max_bitmap_size);
        if (width, height) == (ow, oh) {
            return image;
        }
        tracing::debug!("Downscaling {}x{} -> {}x{}", ow, oh, width, height);
        image.resize_exact(width, height, image::imageops::FilterType::Triangle)
    }
}

impl ImageDecoder for RasterDecoder {
    fn decode(
        &self,
        data: &[u8],
        mime_type: Option<&str>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: &DecodeConfig,
    ) -> Result<DecodedImage, DecodeError> {
        let image = Self::load(data, mime_type)?;
        let (original_width, original_height) = (image.width(), image.height());
        let scaled = Self::scale(image, target_width, target_height, config);
        let (width, height) = (scaled.width(), scaled.height());

        Ok(DecodedImage {
            bitmap: bitmap_from_dynamic(scaled, config.allow_rgb565),
            width,
            height,
            original_width,
            original_height,
            is_animated: format::is_animated(data),
        })
    }

    fn decode_progressive(
        &self,
        data: Vec<u8>,
        mime_type: Option<String>,
        target_width: Option<u32>,
        target_height: Option<u32>,
        config: DecodeConfig,
    ) -> ProgressiveFrames {
        ProgressiveFrames::raster(data, mime_type, target_width, target_height, config)
    }
}

/// Header-only decoder: keeps bytes encoded and reports their dimensions
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl ImageDecoder for PassthroughDecoder {
    fn decode(
        &self,
        data: &[u8],
        mime_type: Option<&str>,
        _target_width: Option<u32>,
        _target_height: Option<u32>,
        _config: &DecodeConfig,
    ) -> Result<DecodedImage, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let format = format::detect_format(data, mime_type);
        if format == ImageFormat::Unknown {
            return Err(DecodeError::UnsupportedFormat);
        }
        let (width, height) = format::read_dimensions(data)
            .ok_or_else(|| DecodeError::Malformed("unreadable header".into()))?;

        Ok(DecodedImage {
            bitmap: Bitmap::encoded(data.to_vec(), format, width, height),
            width,
            height,
            original_width: width,
            original_height: height,
            is_animated: format::is_animated(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_target_size_fits_within_target() {
        assert_eq!(compute_target_size(1000, 500, Some(100), Some(100), 4096), (100, 50));
        assert_eq!(compute_target_size(500, 1000, Some(100), None, 4096), (100, 200));
    }

    #[test]
    fn test_target_size_never_upscales() {
        assert_eq!(compute_target_size(100, 100, Some(400), Some(400), 4096), (100, 100));
        assert_eq!(compute_target_size(100, 100, None, None, 4096), (100, 100));
    }

    #[test]
    fn test_target_size_clamped_to_max_bitmap() {
        assert_eq!(compute_target_size(8192, 4096, None, None, 4096), (4096, 2048));
        assert_eq!(compute_target_size(10000, 100, Some(9000), Some(100), 1000), (1000, 10));
    }

    #[test]
    fn test_raster_decode_downscales() {
        let data = encode_png(64, 32);
        let decoded = RasterDecoder
            .decode(&data, None, Some(16), Some(16), &DecodeConfig::default())
            .unwrap();

        assert_eq!((decoded.width, decoded.height), (16, 8));
        assert_eq!((decoded.original_width, decoded.original_height), (64, 32));
        assert_eq!(decoded.bitmap.byte_size(), 16 * 8 * 4);
        assert!(!decoded.is_animated);
    }

    #[test]
    fn test_raster_decode_rgb565_for_opaque() {
        let image = image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        let config = DecodeConfig { allow_rgb565: true, ..Default::default() };

        let decoded = RasterDecoder.decode(out.get_ref(), None, None, None, &config).unwrap();
        assert_eq!(decoded.bitmap.format(), crate::PixelFormat::Rgb565);
    }

    #[test]
    fn test_unknown_bytes_are_unsupported() {
        let err = RasterDecoder
            .decode(b"not an image", None, None, None, &DecodeConfig::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat));
        assert!(matches!(
            RasterDecoder.decode(&[], None, None, None, &DecodeConfig::default()),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn test_truncated_png_is_malformed() {
        let data = encode_png(32, 32);
        let err = RasterDecoder
            .decode(&data[..40], None, None, None, &DecodeConfig::default())
            .unwrap_err();
        assert!(!matches!(err, DecodeError::UnsupportedFormat));
    }

    #[test]
    fn test_passthrough_reads_header() {
        let data = encode_png(20, 10);
        let decoded = PassthroughDecoder
            .decode(&data, None, Some(5), Some(5), &DecodeConfig::default())
            .unwrap();
        assert_eq!((decoded.width, decoded.height), (20, 10));
        assert_eq!(decoded.bitmap.byte_size(), data.len());
    }
}
