//! Error types for pixfetch
//!
//! Errors are split by subsystem. `FetchError` is the taxonomy surfaced to
//! observers through the completion callback; it is `Clone` because a single
//! result fans out to every observer registered for a cache key. `CacheError`
//! covers the disk store and never crosses the public fetch boundary directly.

use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure for a single fetch attempt, delivered to every observer.
///
/// No variant is retried automatically by this layer; retry policy belongs to
/// the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport or HTTP failure
    #[error("network request failed: {reason}")]
    Network { reason: String },

    /// The origin reported the resource absent
    #[error("image not found at origin (HTTP {status})")]
    NotFound { status: u16 },

    /// Every observer was removed before the fetch completed
    #[error("fetch cancelled before completion")]
    Cancelled,

    /// Bytes were fetched or read back but could not be decoded
    #[error("image data could not be decoded")]
    CorruptImage,
}

impl FetchError {
    /// Error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::NotFound { .. } => "not_found",
            FetchError::Cancelled => "cancelled",
            FetchError::CorruptImage => "corrupt_image",
        }
    }
}

/// Disk store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// A recorded file is missing from disk (index/disk mismatch)
    #[error("cached file missing from disk: {path}")]
    FileMissing { path: PathBuf },

    /// I/O error during a cache operation
    #[error("cache I/O error")]
    Io(#[from] std::io::Error),

    /// Index blob could not be serialized or parsed
    #[error("cache index serialization error")]
    IndexSerialization(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum OptionsError {
    /// A pool size or batch size of zero is meaningless
    #[error("invalid value for {field}: {value}. {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Top-level error that can represent any subsystem failure
#[derive(Error, Debug)]
pub enum AppError {
    /// Fetch pipeline error
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Disk store error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;
