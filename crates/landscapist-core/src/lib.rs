//! Landscapist Core
//!
//! The loading pipeline underneath image views: a two-tier memory cache, a
//! disk cache, a priority decode scheduler and a request registry, wired
//! together by [`ImageLoader`].

mod cache;
mod config;
mod error;
mod key;
mod loader;
mod request;
mod request_manager;
mod result;
mod scheduler;

pub use cache::{CachedImage, DiskCache, DiskCacheError, FileDiskCache, MemoryCache, MemoryCacheStats};
pub use config::LandscapistConfig;
pub use error::LandscapistError;
pub use key::CacheKey;
pub use loader::{ImageLoad, ImageLoader, ImageLoaderBuilder};
pub use request::{CachePolicy, ImageRequest, ImageRequestBuilder};
pub use request_manager::{Disposable, ImmediateDisposable, RequestDisposable, RequestManager};
pub use result::ImageResult;
pub use scheduler::{
    DEFAULT_PARALLELISM, DecodePriority, DecodeScheduler, DecodeToken, PrioritizedRequest, ScheduledDecode, SchedulerError,
};

pub use landscapist_net::{DataSource, ImageModel, NetworkConfig};
