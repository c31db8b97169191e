//! Decoded bitmaps
//!
//! The pixel container handed to the presentation layer. Cache tiers share
//! bitmaps behind `Arc`, so a `Bitmap` is never mutated after decode.

use image::{DynamicImage, RgbaImage};

use crate::format::ImageFormat;

/// Pixel layout of a [`Bitmap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel, straight alpha
    Rgba8888,
    /// 2 bytes per pixel, little-endian 5-6-5, opaque
    Rgb565,
    /// Still encoded; the presentation layer decodes it itself
    Encoded(ImageFormat),
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgba8888 => Some(4),
            Self::Rgb565 => Some(2),
            Self::Encoded(_) => None,
        }
    }
}

/// A decoded image ready for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Create from raw RGBA data
    pub fn from_rgba(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            format: PixelFormat::Rgba8888,
            pixels,
        }
    }

    /// Wrap still-encoded bytes whose dimensions were read from the header
    pub fn encoded(data: Vec<u8>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Encoded(format),
            pixels: data,
        }
    }

    pub(crate) fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_rgba(image.into_raw(), width, height)
    }

    /// Pack an opaque RGBA image into RGB565
    pub(crate) fn rgb565_from_image(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 2);
        for pixel in image.pixels() {
            let [r, g, b, _] = pixel.0;
            let packed = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
            pixels.extend_from_slice(&packed.to_le_bytes());
        }
        Self {
            width,
            height,
            format: PixelFormat::Rgb565,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Memory size in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Get pixel at (x, y) as RGBA
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        match self.format {
            PixelFormat::Rgba8888 => {
                let idx = index * 4;
                let px = self.pixels.get(idx..idx + 4)?;
                Some([px[0], px[1], px[2], px[3]])
            }
            PixelFormat::Rgb565 => {
                let idx = index * 2;
                let px = self.pixels.get(idx..idx + 2)?;
                Some(unpack_rgb565(u16::from_le_bytes([px[0], px[1]])))
            }
            PixelFormat::Encoded(_) => None,
        }
    }

    /// Expand to an RGBA image; `None` for still-encoded bitmaps
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        match self.format {
            PixelFormat::Rgba8888 => RgbaImage::from_raw(self.width, self.height, self.pixels.clone()),
            PixelFormat::Rgb565 => {
                let mut rgba = Vec::with_capacity(self.pixels.len() * 2);
                for chunk in self.pixels.chunks_exact(2) {
                    rgba.extend_from_slice(&unpack_rgb565(u16::from_le_bytes([chunk[0], chunk[1]])));
                }
                RgbaImage::from_raw(self.width, self.height, rgba)
            }
            PixelFormat::Encoded(_) => None,
        }
    }

    /// Rebuild a bitmap in this bitmap's pixel format from an RGBA image
    pub(crate) fn with_same_format(&self, image: RgbaImage) -> Self {
        match self.format {
            PixelFormat::Rgb565 => Self::rgb565_from_image(&image),
            _ => Self::from_image(image),
        }
    }
}

fn unpack_rgb565(packed: u16) -> [u8; 4] {
    let r = ((packed >> 11) & 0x1F) as u8;
    let g = ((packed >> 5) & 0x3F) as u8;
    let b = (packed & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
}

/// Convert a decoded frame, honoring the RGB565 preference for opaque images
pub(crate) fn bitmap_from_dynamic(image: DynamicImage, allow_rgb565: bool) -> Bitmap {
    let opaque = !image.color().has_alpha();
    let rgba = image.into_rgba8();
    if allow_rgb565 && opaque {
        Bitmap::rgb565_from_image(&rgba)
    } else {
        Bitmap::from_image(rgba)
    }
}
