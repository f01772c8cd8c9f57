//! pixfetch
//!
//! An asynchronous image fetching and caching pipeline for scrolling feeds.
//! Requests are de-duplicated while in flight, decoded bitmaps are held in a
//! bounded in-memory LRU, raw bytes are persisted to a disk store with a
//! batched index, and downloads and decodes run on bounded worker pools with
//! priority promotion and per-key cancellation.

pub mod app;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use app::{FetchController, FetcherOptions, FetchResult, ImageRequest};
pub use errors::{AppError, FetchError, Result};
