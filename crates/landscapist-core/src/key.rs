//! Cache keys

use std::fmt;

use sha2::{Digest, Sha256};

/// Identity of a cached image: source plus everything that changes its pixels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub transformation_keys: Vec<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl CacheKey {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transformation_keys: Vec::new(),
            width: None,
            height: None,
        }
    }

    pub fn with_transformations(mut self, keys: Vec<String>) -> Self {
        self.transformation_keys = keys;
        self
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Human-readable key: `url[#t=k1,k2][#s=WxH]`
    pub fn memory_key(&self) -> String {
        let mut key = self.url.clone();
        if !self.transformation_keys.is_empty() {
            key.push_str("#t=");
            key.push_str(&self.transformation_keys.join(","));
        }
        if self.width.is_some() || self.height.is_some() {
            key.push_str(&format!("#s={}x{}", side(self.width), side(self.height)));
        }
        key
    }

    /// Lowercase hex SHA-256 of [`memory_key`](Self::memory_key)
    pub fn disk_key(&self) -> String {
        hex::encode(Sha256::digest(self.memory_key().as_bytes()))
    }
}

fn side(value: Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.memory_key())
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}
