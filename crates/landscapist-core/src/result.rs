//! Load states

use std::path::PathBuf;
use std::sync::Arc;

use landscapist_image::Bitmap;
use landscapist_net::DataSource;

use crate::LandscapistError;

/// One state of a load; a load emits `Loading`, zero or more intermediate
/// `Success` frames, then a final `Success` or a `Failure`
#[derive(Debug, Clone)]
pub enum ImageResult {
    Loading,
    Success {
        bitmap: Arc<Bitmap>,
        data_source: DataSource,
        original_width: u32,
        original_height: u32,
        /// Encoded bytes the bitmap was decoded from
        raw_data: Option<Arc<[u8]>>,
        disk_cache_path: Option<PathBuf>,
        is_intermediate: bool,
        /// Decode progress in `[0, 1]`
        progress: f32,
    },
    Failure {
        error: Option<Arc<LandscapistError>>,
        message: Option<String>,
    },
}

impl ImageResult {
    pub fn failure(error: impl Into<LandscapistError>) -> Self {
        let error = error.into();
        Self::Failure {
            message: Some(error.to_string()),
            error: Some(Arc::new(error)),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// True for a non-intermediate `Success`
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success { is_intermediate: false, .. })
    }

    /// True for states after which nothing more is emitted
    pub fn is_terminal(&self) -> bool {
        self.is_final() || self.is_failure()
    }

    pub fn bitmap(&self) -> Option<&Arc<Bitmap>> {
        match self {
            Self::Success { bitmap, .. } => Some(bitmap),
            _ => None,
        }
    }

    pub fn data_source(&self) -> Option<DataSource> {
        match self {
            Self::Success { data_source, .. } => Some(*data_source),
            _ => None,
        }
    }
}
