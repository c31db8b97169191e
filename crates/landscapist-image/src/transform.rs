//! Bitmap transformations
//!
//! Transformations run after decode and before the memory cache write. Each
//! contributes a stable key so transformed bitmaps get their own cache slot.

use std::fmt;

use image::imageops;

use crate::bitmap::Bitmap;

/// A post-decode pixel transformation
pub trait Transformation: Send + Sync + fmt::Debug {
    /// Stable identifier, part of the cache key
    fn key(&self) -> String;

    fn transform(&self, bitmap: Bitmap) -> Bitmap;
}

/// Apply `transformations` in order
pub fn apply_all(bitmap: Bitmap, transformations: &[std::sync::Arc<dyn Transformation>]) -> Bitmap {
    transformations.iter().fold(bitmap, |bitmap, t| t.transform(bitmap))
}

/// Gaussian blur
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurTransformation {
    radius: f32,
}

impl BlurTransformation {
    /// Radius is clamped to `[0, 25]`
    pub fn new(radius: f32) -> Self {
        Self {
            radius: radius.clamp(0.0, 25.0),
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Gaussian standard deviation used for `radius`
    pub fn sigma(&self) -> f32 {
        0.4 * self.radius + 0.6
    }
}

impl Transformation for BlurTransformation {
    fn key(&self) -> String {
        format!("blur({})", self.radius)
    }

    fn transform(&self, bitmap: Bitmap) -> Bitmap {
        if self.radius <= 0.0 {
            return bitmap;
        }
        let Some(rgba) = bitmap.to_rgba_image() else {
            tracing::debug!("Skipping blur on encoded bitmap");
            return bitmap;
        };
        let blurred = imageops::blur(&rgba, self.sigma());
        bitmap.with_same_format(blurred)
    }
}

/// Luminance-only rendering using the Rec. 601 weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrayscaleTransformation;

impl Transformation for GrayscaleTransformation {
    fn key(&self) -> String {
        "grayscale".to_string()
    }

    fn transform(&self, bitmap: Bitmap) -> Bitmap {
        let Some(mut rgba) = bitmap.to_rgba_image() else {
            tracing::debug!("Skipping grayscale on encoded bitmap");
            return bitmap;
        };
        for pixel in rgba.pixels_mut() {
            let [r, g, b, a] = pixel.0;
            let luma = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8;
            pixel.0 = [luma, luma, luma, a];
        }
        bitmap.with_same_format(rgba)
    }
}
