//! Request and result types for the fetch pipeline
//!
//! An [`ImageRequest`] is an immutable value identifying one image fetch. Two
//! keys are derived from it: the cache key (identity + target + source size)
//! used for the memory cache and in-flight de-duplication, and the disk cache
//! key (identity + source size only), because raw bytes are independent of the
//! target crop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::FetchError;

/// Pixel dimensions of a bitmap or render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero dimension means "no usable size hint"
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Target render size plus the source image's native size
///
/// Value type; equality is by both dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeMetrics {
    /// Exact dimensions the decoded bitmap must have
    pub target: Dimensions,
    /// Native dimensions of the source image
    pub source: Dimensions,
}

impl SizeMetrics {
    pub fn new(target: Dimensions, source: Dimensions) -> Self {
        Self { target, source }
    }
}

/// Immutable description of one image fetch
///
/// Owned by the caller; in-flight operations hold it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Image URL to download from
    pub url: String,
    /// Stable identity of the image, independent of render size
    pub identifier: String,
    /// Queue the underlying operations at low priority
    pub is_low_priority: bool,
    /// Target/source sizing, when the caller knows it
    pub size_metrics: Option<SizeMetrics>,
}

impl ImageRequest {
    pub fn new(url: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identifier: identifier.into(),
            is_low_priority: false,
            size_metrics: None,
        }
    }

    /// Set target/source sizing
    pub fn with_size_metrics(mut self, metrics: SizeMetrics) -> Self {
        self.size_metrics = Some(metrics);
        self
    }

    /// Queue the underlying operations at low priority
    pub fn with_low_priority(mut self, low: bool) -> Self {
        self.is_low_priority = low;
        self
    }

    /// Key for the memory cache and in-flight de-duplication
    ///
    /// Distinguishes the same image rendered at different target sizes.
    pub fn cache_key(&self) -> String {
        match &self.size_metrics {
            Some(m) => format!("{}-t{}-s{}", self.identifier, m.target, m.source),
            None => self.identifier.clone(),
        }
    }

    /// Key for raw-byte storage on disk, independent of the target crop
    pub fn disk_cache_key(&self) -> String {
        match &self.size_metrics {
            Some(m) => format!("{}-s{}", self.identifier, m.source),
            None => self.identifier.clone(),
        }
    }

    /// Size metrics usable for resizing, treating a zero target as absent
    pub fn usable_size_metrics(&self) -> Option<SizeMetrics> {
        self.size_metrics
            .filter(|m| !m.target.is_degenerate() && !m.source.is_degenerate())
    }
}

impl PartialEq for ImageRequest {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.size_metrics == other.size_metrics
    }
}

impl Eq for ImageRequest {}

impl std::hash::Hash for ImageRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
    }
}

/// Decoded bitmap delivered to observers
pub type Bitmap = image::DynamicImage;

/// Outcome of a fetch: a shared decoded bitmap or a terminal error
pub type FetchOutcome = std::result::Result<Arc<Bitmap>, FetchError>;

/// Result delivered to every observer of a cache key
#[derive(Clone)]
pub struct FetchResult {
    pub request: Arc<ImageRequest>,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn new(request: Arc<ImageRequest>, outcome: FetchOutcome) -> Self {
        Self { request, outcome }
    }

    /// The bitmap, if the fetch succeeded
    pub fn bitmap(&self) -> Option<Arc<Bitmap>> {
        self.outcome.as_ref().ok().cloned()
    }
}

impl fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResult")
            .field("cache_key", &self.request.cache_key())
            .field("ok", &self.outcome.is_ok())
            .finish()
    }
}

/// Completion callback registered by a caller
pub type FetchCallback = Box<dyn FnOnce(FetchResult) + Send + 'static>;

/// How a request was ultimately fulfilled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentType {
    Downloaded,
    MemoryCache,
    DiskCache,
}

impl fmt::Display for FulfillmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FulfillmentType::Downloaded => "downloaded",
            FulfillmentType::MemoryCache => "memory_cache",
            FulfillmentType::DiskCache => "disk_cache",
        };
        f.write_str(s)
    }
}

/// Per-request phase timings, reported through `tracing` at debug level
#[derive(Debug)]
pub struct FetchMetrics {
    identifier: String,
    started: Instant,
    pub memory_lookup_time: Option<Duration>,
    pub download_time: Option<Duration>,
    pub disk_read_time: Option<Duration>,
    pub render_time: Option<Duration>,
    pub bytes: usize,
}

impl FetchMetrics {
    pub fn start(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            started: Instant::now(),
            memory_lookup_time: None,
            download_time: None,
            disk_read_time: None,
            render_time: None,
            bytes: 0,
        }
    }

    /// Total wall-clock time since the request entered the pipeline
    pub fn total_time(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log the collected timings once, at fulfillment
    pub fn report(&self, fulfillment: FulfillmentType) {
        tracing::debug!(
            identifier = %self.identifier,
            fulfillment = %fulfillment,
            total_ms = self.total_time().as_millis() as u64,
            memory_lookup_us = self.memory_lookup_time.map(|d| d.as_micros() as u64),
            download_ms = self.download_time.map(|d| d.as_millis() as u64),
            disk_read_ms = self.disk_read_time.map(|d| d.as_millis() as u64),
            render_ms = self.render_time.map(|d| d.as_millis() as u64),
            bytes = self.bytes,
            "image request fulfilled"
        );
    }
}
