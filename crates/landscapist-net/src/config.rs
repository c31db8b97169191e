//! Network configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP settings for [`NetworkFetcher`](crate::NetworkFetcher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connection timeout
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Total time allowed per request, from connect until the body is read
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Sent with every request unless overridden per request
    pub default_headers: Vec<(String, String)>,
    pub follow_redirects: bool,
    /// Max redirects to follow when `follow_redirects` is set
    pub max_redirects: u32,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment
    pub use_system_proxy: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: format!("Landscapist/{}", env!("CARGO_PKG_VERSION")),
            default_headers: Vec::new(),
            follow_redirects: true,
            max_redirects: 5,
            use_system_proxy: true,
        }
    }
}

impl NetworkConfig {
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Durations as integer milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert!(config.follow_redirects);
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_default_header_builder() {
        let config = NetworkConfig::default().with_default_header("Accept", "image/*");
        assert_eq!(config.default_headers, vec![("Accept".to_string(), "image/*".to_string())]);
    }
}
