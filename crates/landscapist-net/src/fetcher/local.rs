//! In-process and local filesystem fetchers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{FetchRequest, FetchResult, FetchedData, Fetcher, sniff_mime};
use crate::{DataSource, FetchError, ImageModel};

/// Passes pre-decoded bitmaps through
#[derive(Debug, Default, Clone, Copy)]
pub struct BitmapFetcher;

#[async_trait]
impl Fetcher for BitmapFetcher {
    fn name(&self) -> &'static str {
        "bitmap"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        matches!(model, ImageModel::Bitmap(_))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        match &request.model {
            ImageModel::Bitmap(bitmap) => Ok(FetchResult {
                data: FetchedData::Decoded(Arc::clone(bitmap)),
                mime_type: None,
                data_source: DataSource::Memory,
            }),
            other => Err(FetchError::UnsupportedModel { kind: other.kind() }),
        }
    }
}

/// Raw in-memory bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesFetcher;

#[async_trait]
impl Fetcher for BytesFetcher {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        matches!(model, ImageModel::Bytes(_))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        match &request.model {
            ImageModel::Bytes(bytes) => {
                let mime_type = sniff_mime(bytes, None);
                Ok(FetchResult::encoded(bytes.to_vec(), mime_type, DataSource::Inline))
            }
            other => Err(FetchError::UnsupportedModel { kind: other.kind() }),
        }
    }
}

/// Local files, as paths or absolute path strings
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    fn name(&self) -> &'static str {
        "file"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        match model {
            ImageModel::File(_) => true,
            ImageModel::Url(url) => Path::new(url).is_absolute(),
            _ => false,
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let path = match &request.model {
            ImageModel::File(path) => path.clone(),
            ImageModel::Url(url) => PathBuf::from(url),
            other => return Err(FetchError::UnsupportedModel { kind: other.kind() }),
        };
        read_local(&path).await
    }
}

async fn read_local(path: &Path) -> Result<FetchResult, FetchError> {
    let data = smol::fs::read(path).await.map_err(|e| {
        tracing::debug!("Failed to read {}: {}", path.display(), e);
        FetchError::Io(format!("{}: {}", path.display(), e))
    })?;
    let mime_type = sniff_mime(&data, Some(path));
    Ok(FetchResult::encoded(data, mime_type, DataSource::Local))
}

/// `file:` and `data:` URIs
#[derive(Debug, Default, Clone, Copy)]
pub struct UriFetcher;

#[async_trait]
impl Fetcher for UriFetcher {
    fn name(&self) -> &'static str {
        "uri"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        matches!(model, ImageModel::Uri(uri) if matches!(uri.scheme(), "file" | "data"))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let uri = match &request.model {
            ImageModel::Uri(uri) => uri,
            other => return Err(FetchError::UnsupportedModel { kind: other.kind() }),
        };

        match uri.scheme() {
            "file" => {
                let path = uri.to_file_path().map_err(|_| FetchError::InvalidUri(uri.to_string()))?;
                read_local(&path).await
            }
            "data" => {
                let (data, mime_type) = parse_data_uri(uri.as_str())?;
                let mime_type = mime_type.or_else(|| sniff_mime(&data, None));
                Ok(FetchResult::encoded(data, mime_type, DataSource::Inline))
            }
            scheme => Err(FetchError::InvalidUri(format!("unsupported scheme: {scheme}"))),
        }
    }
}

/// Decode `data:[<mime>][;base64],<payload>`
fn parse_data_uri(uri: &str) -> Result<(Vec<u8>, Option<String>), FetchError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::InvalidUri(uri.to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidUri("data URI without payload".to_string()))?;

    let mut params = header.split(';');
    let mime_type = params.next().filter(|m| !m.is_empty()).map(str::to_string);
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let raw = percent_decode(payload);
    let data = if is_base64 {
        let cleaned: Vec<u8> = raw.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| FetchError::InvalidUri(format!("bad base64 payload: {e}")))?
    } else {
        raw
    };
    Ok((data, mime_type))
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push((hex_value(bytes[i + 1]) << 4) | hex_value(bytes[i + 2]));
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit.to_ascii_lowercase() - b'a' + 10,
    }
}

#[derive(Debug, Clone)]
enum ResourceEntry {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// Bundled resources, registered by id
#[derive(Debug, Default, Clone)]
pub struct ResourceFetcher {
    resources: HashMap<u32, ResourceEntry>,
}

impl ResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource backed by a file on disk
    pub fn with_path(mut self, id: u32, path: impl Into<PathBuf>) -> Self {
        self.resources.insert(id, ResourceEntry::Path(path.into()));
        self
    }

    /// Resource held in memory
    pub fn with_bytes(mut self, id: u32, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.resources.insert(id, ResourceEntry::Bytes(bytes.into()));
        self
    }

    pub fn contains(&self, id: u32) -> bool {
        self.resources.contains_key(&id)
    }
}

#[async_trait]
impl Fetcher for ResourceFetcher {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        matches!(model, ImageModel::Resource(_))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let id = match &request.model {
            ImageModel::Resource(id) => *id,
            other => return Err(FetchError::UnsupportedModel { kind: other.kind() }),
        };

        match self.resources.get(&id) {
            Some(ResourceEntry::Bytes(bytes)) => {
                let mime_type = sniff_mime(bytes, None);
                Ok(FetchResult::encoded(bytes.to_vec(), mime_type, DataSource::Resource))
            }
            Some(ResourceEntry::Path(path)) => {
                let mut result = read_local(path).await?;
                result.data_source = DataSource::Resource;
                Ok(result)
            }
            None => Err(FetchError::ResourceNotFound(id)),
        }
    }
}
