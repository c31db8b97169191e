//! Fetchers
//!
//! A fetcher turns an [`ImageModel`] into bytes (or a ready bitmap). The
//! [`CompositeFetcher`] routes each model to the first fetcher that can
//! handle it.

mod local;
mod network;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use landscapist_image::{Bitmap, ImageFormat};

use crate::{DataSource, FetchError, ImageModel, NetworkConfig};

pub use local::{BitmapFetcher, BytesFetcher, FileFetcher, ResourceFetcher, UriFetcher};
pub use network::NetworkFetcher;

/// What to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub model: ImageModel,
    /// Extra request headers, layered over any fetcher defaults
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(model: impl Into<ImageModel>) -> Self {
        Self { model: model.into(), headers: Vec::new() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Fetched payload
#[derive(Debug, Clone)]
pub enum FetchedData {
    /// Encoded image bytes, still to be decoded
    Encoded(Vec<u8>),
    /// Already-decoded bitmap
    Decoded(Arc<Bitmap>),
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub data: FetchedData,
    pub mime_type: Option<String>,
    pub data_source: DataSource,
}

impl FetchResult {
    pub fn encoded(data: Vec<u8>, mime_type: Option<String>, data_source: DataSource) -> Self {
        Self { data: FetchedData::Encoded(data), mime_type, data_source }
    }

    /// Encoded bytes, if any
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            FetchedData::Encoded(data) => Some(data),
            FetchedData::Decoded(_) => None,
        }
    }
}

/// Source of image data for some subset of models
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn can_handle(&self, model: &ImageModel) -> bool;

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;
}

/// Routes each request to the first fetcher that can handle it
pub struct CompositeFetcher {
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl CompositeFetcher {
    pub fn new(fetchers: Vec<Arc<dyn Fetcher>>) -> Self {
        Self { fetchers }
    }

    /// Bitmap, Bytes, File, Uri, Resource, then Network
    pub fn with_defaults(network: &NetworkConfig) -> Result<Self, FetchError> {
        Ok(Self::builder()
            .fetcher(BitmapFetcher)
            .fetcher(BytesFetcher)
            .fetcher(FileFetcher)
            .fetcher(UriFetcher)
            .fetcher(ResourceFetcher::new())
            .fetcher(NetworkFetcher::new(network.clone())?)
            .build())
    }

    pub fn builder() -> CompositeFetcherBuilder {
        CompositeFetcherBuilder::default()
    }

    pub fn fetchers(&self) -> &[Arc<dyn Fetcher>] {
        &self.fetchers
    }

    pub fn can_handle(&self, model: &ImageModel) -> bool {
        self.fetchers.iter().any(|f| f.can_handle(model))
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let Some(fetcher) = self.fetchers.iter().find(|f| f.can_handle(&request.model)) else {
            tracing::warn!("No fetcher for {:?}", request.model);
            return Err(FetchError::UnsupportedModel { kind: request.model.kind() });
        };

        tracing::debug!("Fetching {:?} with {}", request.model, fetcher.name());
        fetcher.fetch(request).await
    }
}

/// Builder for [`CompositeFetcher`]
#[derive(Default)]
pub struct CompositeFetcherBuilder {
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl CompositeFetcherBuilder {
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetchers.push(Arc::new(fetcher));
        self
    }

    pub fn shared(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn build(self) -> CompositeFetcher {
        CompositeFetcher::new(self.fetchers)
    }
}

/// Mime type from magic bytes, falling back to the path's extension
pub(crate) fn sniff_mime(data: &[u8], path: Option<&Path>) -> Option<String> {
    let mut format = ImageFormat::from_bytes(data);
    if format == ImageFormat::Unknown {
        if let Some(ext) = path.and_then(|p| p.extension()).and_then(|e| e.to_str()) {
            format = ImageFormat::from_extension(ext);
        }
    }
    format.mime_type().map(str::to_string)
}
