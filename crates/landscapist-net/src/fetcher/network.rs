//! HTTP(S) fetcher
//!
//! Uses reqwest's blocking client, driven from smol's blocking pool so the
//! async side never needs a tokio runtime.

use async_trait::async_trait;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;

use super::{FetchRequest, FetchResult, Fetcher};
use crate::{DataSource, FetchError, ImageModel, NetworkConfig};

/// Fetches `http`/`https` models
pub struct NetworkFetcher {
    client: Client,
    config: NetworkConfig,
}

impl NetworkFetcher {
    pub fn new(config: NetworkConfig) -> Result<Self, FetchError> {
        let redirect = if config.follow_redirects {
            Policy::limited(config.max_redirects as usize)
        } else {
            Policy::none()
        };

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .redirect(redirect)
            .default_headers(header_map(&config.default_headers));
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build().map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn url_of(model: &ImageModel) -> Option<String> {
        match model {
            ImageModel::Url(url) if model.is_network() => Some(url.trim().to_string()),
            ImageModel::Uri(uri) if model.is_network() => Some(uri.to_string()),
            _ => None,
        }
    }
}

/// Invalid names or values are skipped
fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header {}", name),
        }
    }
    map
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    fn name(&self) -> &'static str {
        "network"
    }

    fn can_handle(&self, model: &ImageModel) -> bool {
        model.is_network()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let url = Self::url_of(&request.model)
            .ok_or(FetchError::UnsupportedModel { kind: request.model.kind() })?;
        let client = self.client.clone();
        // Per-request headers replace defaults of the same name
        let headers = header_map(&request.headers);

        tracing::info!("HTTP GET {}", url);

        smol::unblock(move || {
            let response = client.get(&url).headers(headers).send()?;
            let status = response.status();
            if !status.is_success() {
                tracing::debug!("HTTP {} for {}", status.as_u16(), url);
                return Err(FetchError::Http {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("").to_string(),
                });
            }

            let mime_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
            let body = response.bytes()?.to_vec();
            tracing::debug!("Fetched {} ({} bytes)", url, body.len());

            Ok(FetchResult::encoded(body, mime_type, DataSource::Network))
        })
        .await
    }
}
