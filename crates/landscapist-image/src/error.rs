//! Decode errors

use crate::region::Region;

/// Errors from whole-image decoding
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Empty image data")]
    Empty,

    #[error("Malformed image data: {0}")]
    Malformed(String),

    #[error("Decode failed: {0}")]
    Decoder(String),
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::Decoder(e.to_string()),
            image::ImageError::Decoding(e) => Self::Malformed(e.to_string()),
            other => Self::Decoder(other.to_string()),
        }
    }
}

impl From<png::DecodingError> for DecodeError {
    fn from(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::Format(e) => Self::Malformed(e.to_string()),
            other => Self::Decoder(other.to_string()),
        }
    }
}

/// Errors from region decoding; every variant names the region that failed
/// so a tiled renderer can retry just that tile.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegionDecodeError {
    #[error("Region {region:?} is outside the {width}x{height} image")]
    InvalidRegion { region: Region, width: u32, height: u32 },

    #[error("Region decoder used after close (region {region:?})")]
    Recycled { region: Region },

    #[error("Reusable buffer of {capacity} bytes cannot hold {required} bytes (region {region:?})")]
    IncompatibleBuffer {
        region: Region,
        capacity: usize,
        required: usize,
    },

    #[error("Failed to decode region {region:?}: {source}")]
    Decode {
        region: Region,
        #[source]
        source: DecodeError,
    },
}

impl RegionDecodeError {
    pub fn region(&self) -> Region {
        match self {
            Self::InvalidRegion { region, .. }
            | Self::Recycled { region }
            | Self::IncompatibleBuffer { region, .. }
            | Self::Decode { region, .. } => *region,
        }
    }
}
