//! Landscapist Net
//!
//! Resolves image models to data: in-memory bitmaps and bytes, local files,
//! `file:`/`data:` URIs, bundled resources and HTTP(S).

mod config;
mod error;
mod fetcher;
mod model;

pub use config::NetworkConfig;
pub use error::FetchError;
pub use fetcher::{
    BitmapFetcher, BytesFetcher, CompositeFetcher, CompositeFetcherBuilder, FetchRequest, FetchResult, FetchedData,
    Fetcher, FileFetcher, NetworkFetcher, ResourceFetcher, UriFetcher,
};
pub use model::{DataSource, ImageModel};

pub use url::Url;
