//! Bounded icon downloads.
//!
//! The fetcher only sees the [`IconSource`] capability, so tests (and other
//! transports) can stand in for HTTP. Every fetch is capped by a byte count
//! and a wall-clock deadline; a stalled server costs at most one tick.

use std::cmp::min;
use std::time::Duration;

use futures_util::StreamExt;
use log::debug;
use reqwest::Client;
use url::Url;

use crate::config::EngineConfig;
use crate::error::{IconError, ResultExt};

/// Caller-imposed ceilings for a single fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: usize,
    pub timeout: Duration,
}

/// Something that can turn an icon URL into bytes.
#[allow(async_fn_in_trait)]
pub trait IconSource {
    async fn fetch(&self, url: &str, limits: &FetchLimits) -> Result<Vec<u8>, IconError>;
}

/// Only plain web URLs are fetched; anything else fails before a request.
pub fn parse_icon_url(url: &str) -> Result<Url, IconError> {
    let parsed = Url::parse(url).network_context("Invalid icon URL")?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(IconError::NetworkError(format!("Unsupported URL scheme: {}", other))),
    }
}

/// HTTP(S) icon source backed by `reqwest`
pub struct HttpIconSource {
    client: Client,
}

impl HttpIconSource {
    pub fn new(config: &EngineConfig) -> Result<Self, IconError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .network_context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Stream the body into memory, refusing anything past `max_bytes`.
    async fn download(&self, url: Url, max_bytes: usize) -> Result<Vec<u8>, IconError> {
        let res = self.client.get(url).send().await.map_err(map_reqwest)?;

        if !res.status().is_success() {
            return Err(IconError::NetworkError(format!("HTTP {}", res.status())));
        }

        // Check content length to avoid downloading huge files
        let declared = res.content_length();
        if let Some(len) = declared {
            if len > max_bytes as u64 {
                return Err(IconError::ceiling("icon download", len, max_bytes));
            }
        }

        let capacity = min(declared.unwrap_or(16 * 1024) as usize, max_bytes);
        let mut body = Vec::with_capacity(capacity);
        let mut stream = res.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(map_reqwest)?;
            if body.len() + chunk.len() > max_bytes {
                return Err(IconError::ceiling("icon download", body.len() + chunk.len(), max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

fn map_reqwest(e: reqwest::Error) -> IconError {
    if e.is_timeout() {
        IconError::NetworkTimeout
    } else {
        IconError::NetworkError(e.to_string())
    }
}

impl IconSource for HttpIconSource {
    async fn fetch(&self, url: &str, limits: &FetchLimits) -> Result<Vec<u8>, IconError> {
        let parsed = parse_icon_url(url)?;
        debug!("[Net] GET {} (max {} bytes, {:?})", parsed, limits.max_bytes, limits.timeout);
        match tokio::time::timeout(limits.timeout, self.download(parsed, limits.max_bytes)).await {
            Ok(result) => result,
            Err(_) => Err(IconError::NetworkTimeout),
        }
    }
}
