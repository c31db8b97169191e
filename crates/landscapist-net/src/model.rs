//! Image models
//!
//! The caller-supplied value that identifies where an image comes from.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use landscapist_image::Bitmap;
use sha2::{Digest, Sha256};
use url::Url;

/// Where an image comes from
#[derive(Clone)]
pub enum ImageModel {
    /// Already-decoded pixels
    Bitmap(Arc<Bitmap>),
    /// Encoded bytes held in memory
    Bytes(Arc<[u8]>),
    /// Local file path
    File(PathBuf),
    /// Parsed URI (`file:`, `data:`, `http(s):`)
    Uri(Url),
    /// Bundled resource id
    Resource(u32),
    /// URL string, typically `http(s)://`
    Url(String),
}

impl ImageModel {
    /// Name of the variant, used in "unsupported model" errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bitmap(_) => "Bitmap",
            Self::Bytes(_) => "Bytes",
            Self::File(_) => "File",
            Self::Uri(_) => "Uri",
            Self::Resource(_) => "Resource",
            Self::Url(_) => "Url",
        }
    }

    /// Stable string identifying the model's content, used as the cache url
    pub fn cache_identity(&self) -> String {
        match self {
            Self::Bitmap(bitmap) => format!("bitmap:{:p}", Arc::as_ptr(bitmap)),
            Self::Bytes(bytes) => format!("bytes:{}", hex::encode(Sha256::digest(bytes))),
            Self::File(path) => format!("file:{}", path.display()),
            Self::Uri(uri) => uri.to_string(),
            Self::Resource(id) => format!("resource:{id}"),
            Self::Url(url) => url.clone(),
        }
    }

    /// True for `http`/`https` URL strings and URIs
    pub fn is_network(&self) -> bool {
        match self {
            Self::Url(url) => {
                let lower = url.trim_start().to_ascii_lowercase();
                lower.starts_with("http://") || lower.starts_with("https://")
            }
            Self::Uri(uri) => matches!(uri.scheme(), "http" | "https"),
            _ => false,
        }
    }
}

impl fmt::Debug for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitmap(bitmap) => write!(f, "Bitmap({}x{})", bitmap.width(), bitmap.height()),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Uri(uri) => write!(f, "Uri({uri})"),
            Self::Resource(id) => f.debug_tuple("Resource").field(id).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Shared buffers compare by identity, everything else by value
impl PartialEq for ImageModel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bitmap(a), Self::Bitmap(b)) => Arc::ptr_eq(a, b),
            (Self::Bytes(a), Self::Bytes(b)) => Arc::ptr_eq(a, b),
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Uri(a), Self::Uri(b)) => a == b,
            (Self::Resource(a), Self::Resource(b)) => a == b,
            (Self::Url(a), Self::Url(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for ImageModel {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ImageModel {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<PathBuf> for ImageModel {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<Url> for ImageModel {
    fn from(uri: Url) -> Self {
        Self::Uri(uri)
    }
}

impl From<Vec<u8>> for ImageModel {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<Bitmap> for ImageModel {
    fn from(bitmap: Bitmap) -> Self {
        Self::Bitmap(Arc::new(bitmap))
    }
}

/// Where a loaded image was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    Memory,
    Disk,
    Network,
    Local,
    Resource,
    Inline,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind() {
        assert_eq!(ImageModel::from("https://example.com/a.png").kind(), "Url");
        assert_eq!(ImageModel::from(PathBuf::from("/tmp/a.png")).kind(), "File");
        assert_eq!(ImageModel::Resource(7).kind(), "Resource");
    }

    #[test]
    fn test_network_detection() {
        assert!(ImageModel::from("HTTPS://example.com/a.png").is_network());
        assert!(!ImageModel::from("/var/images/a.png").is_network());
        let uri = Url::parse("http://example.com/x.jpg").unwrap();
        assert!(ImageModel::Uri(uri).is_network());
    }

    #[test]
    fn test_bytes_identity_is_content_hash() {
        let a = ImageModel::from(vec![1, 2, 3]);
        let b = ImageModel::from(vec![1, 2, 3]);
        assert_eq!(a.cache_identity(), b.cache_identity());
        // Distinct buffers are distinct models
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
