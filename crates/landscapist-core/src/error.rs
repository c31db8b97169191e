use landscapist_image::{DecodeError, RegionDecodeError};
use landscapist_net::FetchError;

use crate::{DiskCacheError, SchedulerError};

/// Any failure the pipeline can report
#[derive(Debug, thiserror::Error)]
pub enum LandscapistError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    RegionDecode(#[from] RegionDecodeError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    DiskCache(#[from] DiskCacheError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl LandscapistError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Scheduler(SchedulerError::Cancelled(_)))
    }
}
