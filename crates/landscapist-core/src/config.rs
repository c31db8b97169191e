//! Pipeline configuration

use std::path::PathBuf;

use landscapist_image::{DEFAULT_MAX_BITMAP_SIZE, DecodeConfig};
use landscapist_net::NetworkConfig;
use serde::{Deserialize, Serialize};

use crate::LandscapistError;
use crate::scheduler::DEFAULT_PARALLELISM;

/// Configuration for an [`ImageLoader`](crate::ImageLoader)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapistConfig {
    /// Memory cache budget in bytes
    pub memory_cache_size: u64,
    /// Disk cache budget in bytes
    pub disk_cache_size: u64,
    /// Disk cache directory; no disk cache when unset
    pub disk_cache_dir: Option<PathBuf>,
    pub network: NetworkConfig,
    /// Max width or height of a decoded bitmap
    pub max_bitmap_size: u32,
    pub allow_rgb565: bool,
    pub weak_references_enabled: bool,
    pub decode_parallelism: usize,
}

impl Default for LandscapistConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: 64 * 1024 * 1024,
            disk_cache_size: 100 * 1024 * 1024,
            disk_cache_dir: None,
            network: NetworkConfig::default(),
            max_bitmap_size: DEFAULT_MAX_BITMAP_SIZE,
            allow_rgb565: false,
            weak_references_enabled: true,
            decode_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl LandscapistConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, LandscapistError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            max_bitmap_size: self.max_bitmap_size,
            allow_rgb565: self.allow_rgb565,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = LandscapistConfig::default();
        assert_eq!(config.memory_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.disk_cache_size, 100 * 1024 * 1024);
        assert_eq!(config.max_bitmap_size, 4096);
        assert!(!config.allow_rgb565);
        assert_eq!(config.decode_parallelism, 4);
    }

    #[test]
    fn test_from_json_partial() {
        let config = LandscapistConfig::from_json(
            r#"{
                "memory_cache_size": 1024,
                "disk_cache_dir": "/tmp/landscapist",
                "network": { "connect_timeout": 2500, "follow_redirects": false }
            }"#,
        )
        .unwrap();

        assert_eq!(config.memory_cache_size, 1024);
        assert_eq!(config.disk_cache_dir, Some(PathBuf::from("/tmp/landscapist")));
        assert_eq!(config.network.connect_timeout, Duration::from_millis(2500));
        assert!(!config.network.follow_redirects);
        assert_eq!(config.network.max_redirects, 5);
        assert_eq!(config.max_bitmap_size, 4096);
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        let err = LandscapistConfig::from_json(r#"{"memory_cache_size": "big"}"#).unwrap_err();
        assert!(matches!(err, LandscapistError::Config(_)));
    }
}
