//! Core pipeline components for pixfetch
//!
//! This module contains the image pipeline: request and result types, the
//! HTTP client, the decode/resize engine, the memory and disk caches, the
//! keyed worker pools, and the controller that ties them together.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pixfetch::app::{
//!     Dimensions, FetchController, FetcherOptions, ImageRequest, SizeMetrics,
//! };
//!
//! # async fn example() -> pixfetch::Result<()> {
//! let controller = FetchController::new(FetcherOptions::default()).await?;
//!
//! // A feed cell wants a 300x200 crop of an 1200x800 photo
//! let request = ImageRequest::new("https://example.com/photo.jpg", "photo-42")
//!     .with_size_metrics(SizeMetrics::new(
//!         Dimensions::new(300, 200),
//!         Dimensions::new(1200, 800),
//!     ));
//!
//! let token = controller
//!     .fetch_image(request, Box::new(|result| match result.outcome {
//!         Ok(bitmap) => println!("ready: {}x{}", bitmap.width(), bitmap.height()),
//!         Err(e) => eprintln!("failed: {}", e),
//!     }))
//!     .await;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod controller;
pub mod decode;
pub mod disk;
pub mod memory;
pub mod observers;
pub mod pool;
pub mod request;

// Re-export main public API
pub use client::{CachePolicy, ClientConfig, ImageClient};
pub use controller::{FetchController, FetcherOptions};
pub use decode::decode_and_resize;
pub use disk::{CachedImageRecord, DiskStore, DiskStoreStats};
pub use memory::{MemoryCache, MemoryCacheStats};
pub use request::{
    Bitmap, Dimensions, FetchCallback, FetchMetrics, FetchOutcome, FetchResult, FulfillmentType,
    ImageRequest, SizeMetrics,
};
