//! Engine configuration.
//!
//! All limits live here so the memory budget of a device can be tuned from a
//! single TOML table. Every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```toml
//! tile_width = 48
//! tile_height = 48
//! pool_slots = 16
//! identity_capacity = 64
//! max_download_bytes = 131072
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::image::DecodeLimits;
use crate::net::FetchLimits;
use crate::pool::TileSize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Canonical tile width in pixels
    pub tile_width: u16,
    /// Canonical tile height in pixels
    pub tile_height: u16,
    /// Number of decoded tiles held at once (N)
    pub pool_slots: usize,
    /// Number of identities tracked at once (M)
    pub identity_capacity: usize,
    /// Number of recent feed entries kept (K)
    pub feed_capacity: usize,
    /// Feed rows the renderer shows at once
    pub visible_rows: usize,
    /// Post content is truncated to this many bytes
    pub max_content_len: usize,
    /// Hard ceiling on a single icon download
    pub max_download_bytes: usize,
    pub fetch_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
    /// Ceiling on inflated PNG scanline bytes (filter bytes included)
    pub png_max_raw_bytes: usize,
    /// Largest baseline JPEG dimension accepted
    pub jpeg_max_dimension: u32,
    /// Largest progressive JPEG dimension accepted
    pub jpeg_progressive_max_dimension: u32,
    /// Largest WebP dimension accepted
    pub webp_max_dimension: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_width: 48,
            tile_height: 48,
            pool_slots: 16,
            identity_capacity: 64,
            feed_capacity: 8,
            visible_rows: 4,
            max_content_len: 280,
            max_download_bytes: 128 * 1024,
            fetch_timeout_ms: 8_000,
            connect_timeout_ms: 4_000,
            user_agent: "ncl/0.1".to_string(),
            png_max_raw_bytes: 1024 * 1024,
            jpeg_max_dimension: 4096,
            jpeg_progressive_max_dimension: 1024,
            webp_max_dimension: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, String> {
        let config: EngineConfig = toml::from_str(src)
            .map_err(|e| format!("Failed to parse engine config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break the pool/cache invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err("Tile dimensions must be non-zero".to_string());
        }
        if self.pool_slots == 0 || self.identity_capacity == 0 || self.feed_capacity == 0 {
            return Err("Pool, identity and feed capacities must be non-zero".to_string());
        }
        if self.pool_slots > self.identity_capacity {
            return Err(format!(
                "pool_slots ({}) must not exceed identity_capacity ({})",
                self.pool_slots, self.identity_capacity
            ));
        }
        if self.feed_capacity >= self.identity_capacity {
            return Err(format!(
                "feed_capacity ({}) must be below identity_capacity ({})",
                self.feed_capacity, self.identity_capacity
            ));
        }
        if self.pool_slots > u16::MAX as usize {
            return Err(format!("pool_slots ({}) exceeds {}", self.pool_slots, u16::MAX));
        }
        let pool_bytes = self
            .tile_size()
            .bytes()
            .checked_mul(self.pool_slots)
            .filter(|&b| b <= isize::MAX as usize);
        if pool_bytes.is_none() {
            return Err("Pool size overflows addressable memory".to_string());
        }
        if self.max_download_bytes == 0 {
            return Err("max_download_bytes must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.tile_width, self.tile_height)
    }

    pub fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            max_bytes: self.max_download_bytes,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            png_max_raw_bytes: self.png_max_raw_bytes,
            jpeg_max_dimension: self.jpeg_max_dimension,
            jpeg_progressive_max_dimension: self.jpeg_progressive_max_dimension,
            webp_max_dimension: self.webp_max_dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml_str(
            "tile_width = 32\npool_slots = 4\nfetch_timeout_ms = 250\n",
        )
        .unwrap();
        assert_eq!(config.tile_size(), TileSize::new(32, 48));
        assert_eq!(config.pool_slots, 4);
        assert_eq!(config.fetch_limits().timeout, Duration::from_millis(250));
        assert_eq!(config.identity_capacity, 64);
    }

    #[test]
    fn test_pool_larger_than_cache_rejected() {
        let err = EngineConfig::from_toml_str("pool_slots = 100\nidentity_capacity = 10").unwrap_err();
        assert!(err.contains("pool_slots"));
    }

    #[test]
    fn test_feed_must_be_smaller_than_cache() {
        let err = EngineConfig::from_toml_str("identity_capacity = 4\nfeed_capacity = 8\npool_slots = 2").unwrap_err();
        assert!(err.contains("feed_capacity"));
        assert!(EngineConfig::from_toml_str("identity_capacity = 8\nfeed_capacity = 8\npool_slots = 2").is_err());
        assert!(EngineConfig::from_toml_str("identity_capacity = 9\nfeed_capacity = 8\npool_slots = 2").is_ok());
    }

    #[test]
    fn test_pool_slots_bounded_by_index_width() {
        let err = EngineConfig::from_toml_str("pool_slots = 70000\nidentity_capacity = 70000").unwrap_err();
        assert!(err.contains("pool_slots"));
        assert!(EngineConfig::from_toml_str("pool_slots = 65535\nidentity_capacity = 65535\ntile_width = 1\ntile_height = 1").is_ok());
    }

    #[test]
    fn test_zero_tile_rejected() {
        assert!(EngineConfig::from_toml_str("tile_height = 0").is_err());
    }
}
