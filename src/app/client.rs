//! HTTP client for image downloads
//!
//! Thin wrapper over `reqwest` that maps transport and status failures onto
//! the fetch error taxonomy. No retry happens here: a failed attempt is
//! terminal for the fetch and retry policy belongs to the caller. The number
//! of requests issued is counted so tests can observe cache hits bypassing
//! the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use url::Url;

use crate::constants::http;
use crate::errors::FetchError;

/// How the underlying HTTP client treats protocol caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Honor standard cache-control semantics of intermediaries
    #[default]
    ProtocolDefault,
    /// Send `Cache-Control: no-cache` so every fetch hits the origin
    AlwaysHitNetwork,
}

/// Configuration for the image HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Protocol cache behavior
    pub cache_policy: CachePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            cache_policy: CachePolicy::ProtocolDefault,
        }
    }
}

impl ClientConfig {
    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(idle_timeout) = self.pool_idle_timeout {
            builder = builder.pool_idle_timeout(idle_timeout);
        }

        builder.build().map_err(|e| FetchError::Network {
            reason: format!("client construction failed: {}", e),
        })
    }
}

/// HTTP GET handler for image bytes
pub struct ImageClient {
    client: Client,
    cache_policy: CachePolicy,
    requests_issued: AtomicU64,
}

impl ImageClient {
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: config.build_http_client()?,
            cache_policy: config.cache_policy,
            requests_issued: AtomicU64::new(0),
        })
    }

    /// Download the raw bytes behind an image URL
    ///
    /// Maps HTTP 404 to `FetchError::NotFound` and every other failure to
    /// `FetchError::Network`.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::Network {
            reason: format!("invalid url {}: {}", url, e),
        })?;

        self.requests_issued.fetch_add(1, Ordering::Relaxed);

        let mut request = self.client.get(url.as_str());
        if self.cache_policy == CachePolicy::AlwaysHitNetwork {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await.map_err(|e| FetchError::Network {
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Network {
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Network {
            reason: format!("body read failed: {}", e),
        })?;
        tracing::debug!(url = %url, bytes = bytes.len(), "downloaded image bytes");
        Ok(bytes.to_vec())
    }

    /// Number of network requests issued since construction
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }
}
