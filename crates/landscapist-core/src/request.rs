//! Image requests

use std::fmt;
use std::sync::Arc;

use landscapist_image::Transformation;
use landscapist_net::{FetchRequest, ImageModel};

use crate::{CacheKey, DecodePriority};

/// Whether a cache tier may be read and/or written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    #[default]
    Enabled,
    ReadOnly,
    WriteOnly,
    Disabled,
}

impl CachePolicy {
    pub fn read_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::ReadOnly)
    }

    pub fn write_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::WriteOnly)
    }
}

/// An immutable load request; build with [`ImageRequest::builder`]
#[derive(Clone)]
pub struct ImageRequest {
    model: ImageModel,
    memory_cache_policy: CachePolicy,
    disk_cache_policy: CachePolicy,
    headers: Vec<(String, String)>,
    transformations: Vec<Arc<dyn Transformation>>,
    target_width: Option<u32>,
    target_height: Option<u32>,
    priority: DecodePriority,
    tag: Option<String>,
    progressive: bool,
}

impl ImageRequest {
    /// Request with default policies
    pub fn new(model: impl Into<ImageModel>) -> Self {
        Self::builder(model).build()
    }

    pub fn builder(model: impl Into<ImageModel>) -> ImageRequestBuilder {
        ImageRequestBuilder {
            request: Self {
                model: model.into(),
                memory_cache_policy: CachePolicy::Enabled,
                disk_cache_policy: CachePolicy::Enabled,
                headers: Vec::new(),
                transformations: Vec::new(),
                target_width: None,
                target_height: None,
                priority: DecodePriority::Normal,
                tag: None,
                progressive: true,
            },
        }
    }

    pub fn model(&self) -> &ImageModel {
        &self.model
    }

    pub fn memory_cache_policy(&self) -> CachePolicy {
        self.memory_cache_policy
    }

    pub fn disk_cache_policy(&self) -> CachePolicy {
        self.disk_cache_policy
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    pub fn target_width(&self) -> Option<u32> {
        self.target_width
    }

    pub fn target_height(&self) -> Option<u32> {
        self.target_height
    }

    pub fn priority(&self) -> DecodePriority {
        self.priority
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn progressive(&self) -> bool {
        self.progressive
    }

    /// Key under which this request's result is cached
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.model.cache_identity())
            .with_transformations(self.transformations.iter().map(|t| t.key()).collect())
            .with_size(self.target_width, self.target_height)
    }

    pub(crate) fn fetch_request(&self) -> FetchRequest {
        FetchRequest { model: self.model.clone(), headers: self.headers.clone() }
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("model", &self.model)
            .field("memory_cache_policy", &self.memory_cache_policy)
            .field("disk_cache_policy", &self.disk_cache_policy)
            .field("transformations", &self.transformations)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("priority", &self.priority)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ImageRequest`]
pub struct ImageRequestBuilder {
    request: ImageRequest,
}

impl ImageRequestBuilder {
    pub fn memory_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.memory_cache_policy = policy;
        self
    }

    pub fn disk_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.disk_cache_policy = policy;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Append a transformation; they run in insertion order
    pub fn transformation(mut self, transformation: impl Transformation + 'static) -> Self {
        self.request.transformations.push(Arc::new(transformation));
        self
    }

    pub fn size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.request.target_width = width;
        self.request.target_height = height;
        self
    }

    pub fn priority(mut self, priority: DecodePriority) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.request.tag = Some(tag.into());
        self
    }

    pub fn progressive(mut self, progressive: bool) -> Self {
        self.request.progressive = progressive;
        self
    }

    pub fn build(self) -> ImageRequest {
        self.request
    }
}
