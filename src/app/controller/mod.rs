//! Fetch controller
//!
//! Orchestrates the pipeline: memory cache, then in-flight de-duplication,
//! then disk, then network. Owns the bounded download and render pools and
//! the single state mutex protecting observer bookkeeping. Results fan out to
//! observers from one dedicated notification task, so UI-facing callers need
//! no further synchronization.
//!
//! ```rust,no_run
//! use pixfetch::app::{FetchController, FetcherOptions, ImageRequest};
//!
//! # async fn example() -> pixfetch::Result<()> {
//! let controller = FetchController::new(FetcherOptions::default()).await?;
//!
//! let request = ImageRequest::new("https://example.com/cat.png", "cat-1");
//! let token = controller
//!     .fetch_image(request.clone(), Box::new(|result| {
//!         if let Ok(bitmap) = result.outcome {
//!             println!("got {}x{}", bitmap.width(), bitmap.height());
//!         }
//!     }))
//!     .await;
//!
//! // A scrolled-away cell deregisters; the last observer cancels the work.
//! controller.remove_observer(&request, &token).await;
//! # Ok(())
//! # }
//! ```

mod config;

#[cfg(test)]
mod tests;

pub use config::FetcherOptions;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::client::ImageClient;
use crate::app::decode::decode_and_resize;
use crate::app::disk::{CachedImageRecord, DiskStore, DiskStoreStats};
use crate::app::memory::{MemoryCache, MemoryCacheStats};
use crate::app::observers::ObserverRegistry;
use crate::app::pool::{Priority, WorkerPool};
use crate::app::request::{
    Bitmap, FetchCallback, FetchMetrics, FetchResult, FulfillmentType, ImageRequest,
};
use crate::errors::{CacheError, FetchError, Result};

/// One batch of callbacks to invoke with a shared result
struct Notification {
    callbacks: Vec<FetchCallback>,
    result: FetchResult,
}

/// Image fetching and caching pipeline
///
/// Cheap to share: clones hand out the same instance. Construct one per cache
/// namespace; instances are fully independent.
#[derive(Clone)]
pub struct FetchController {
    shared: Arc<Shared>,
}

struct Shared {
    client: ImageClient,
    memory: MemoryCache,
    disk: DiskStore,
    download_pool: WorkerPool,
    render_pool: WorkerPool,
    /// Single serialization point for observer bookkeeping
    state: Mutex<ObserverRegistry>,
    notifier: mpsc::UnboundedSender<Notification>,
}

impl FetchController {
    /// Create a controller, opening its disk store and starting the
    /// notification task
    pub async fn new(options: FetcherOptions) -> Result<Self> {
        options.validate()?;
        let cache_root = options.resolved_cache_root()?;
        let disk = DiskStore::open(cache_root, options.saves_between_index_flushes).await?;
        let client = ImageClient::new(&options.client)?;

        let (notifier, mut notifications) = mpsc::unbounded_channel::<Notification>();
        // All observer callbacks run here, one batch at a time.
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                for callback in notification.callbacks {
                    callback(notification.result.clone());
                }
            }
        });

        info!(
            cache_root = %disk.root().display(),
            fetches = options.max_concurrent_fetches,
            renders = options.max_concurrent_renders,
            "fetch controller ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                memory: MemoryCache::new(options.memory_cache_capacity),
                disk,
                download_pool: WorkerPool::new("download", options.max_concurrent_fetches),
                render_pool: WorkerPool::new("render", options.max_concurrent_renders),
                state: Mutex::new(ObserverRegistry::new()),
                notifier,
            }),
        })
    }

    /// Initiate or join a fetch, generating an observation token
    ///
    /// Returns immediately; the result arrives asynchronously through
    /// `completion` on the notification task.
    pub async fn fetch_image(&self, request: ImageRequest, completion: FetchCallback) -> String {
        let token = Uuid::new_v4().to_string();
        self.fetch_image_with_token(request, token.clone(), completion)
            .await;
        token
    }

    /// Initiate or join a fetch under a caller-supplied observation token
    pub async fn fetch_image_with_token(
        &self,
        request: ImageRequest,
        token: String,
        completion: FetchCallback,
    ) {
        let request = Arc::new(request);
        let cache_key = request.cache_key();
        let mut metrics = FetchMetrics::start(&request.identifier);

        // Fast path: already decoded and cached in memory.
        let lookup_started = Instant::now();
        let cached = self.shared.memory.get(&cache_key).await;
        metrics.memory_lookup_time = Some(lookup_started.elapsed());
        if let Some(bitmap) = cached {
            metrics.report(FulfillmentType::MemoryCache);
            self.shared
                .send_notification(vec![completion], FetchResult::new(request, Ok(bitmap)));
            return;
        }

        {
            let mut observers = self.shared.state.lock().await;
            if observers.has_observers(&cache_key) {
                // A fetch for this key is already in flight; join it. The
                // promotion stays under the state lock: queueing holds the
                // same lock across its pool submit, so a joiner either sees
                // the pool entry here or the submit sees the raised priority
                // in the registry.
                observers.add_observer(&cache_key, Arc::clone(&request), token, completion);
                if !request.is_low_priority {
                    self.shared.download_pool.promote(&cache_key);
                    self.shared.render_pool.promote(&cache_key);
                }
                debug!(key = %cache_key, "joined in-flight fetch");
                return;
            }
            observers.add_observer(&cache_key, Arc::clone(&request), token, completion);
        }

        match self.shared.disk.lookup(&request.disk_cache_key()).await {
            Some(record) => Shared::queue_render(&self.shared, request, record, metrics).await,
            None => Shared::queue_download(&self.shared, request, metrics).await,
        }
    }

    /// Deregister one caller's interest
    ///
    /// If it was the last observer for the key, the in-flight download and
    /// render operations are cancelled and their handles released. No further
    /// callback fires for the token.
    pub async fn remove_observer(&self, request: &ImageRequest, token: &str) {
        let cache_key = request.cache_key();
        let was_last = {
            let mut observers = self.shared.state.lock().await;
            observers.remove_observer(&cache_key, token)
        };
        if was_last {
            self.shared.download_pool.cancel(&cache_key);
            self.shared.render_pool.cancel(&cache_key);
            debug!(key = %cache_key, "last observer removed, cancelled in-flight work");
        }
    }

    /// Drop every decoded bitmap from memory
    pub async fn clear_memory_cache(&self) {
        self.shared.memory.clear().await;
    }

    /// Delete every raw image and the index from disk
    pub async fn clear_disk_cache(&self) -> Result<()> {
        self.shared.disk.delete_all().await?;
        Ok(())
    }

    /// Clear both caches
    pub async fn clear_caches(&self) -> Result<()> {
        self.clear_memory_cache().await;
        self.clear_disk_cache().await
    }

    /// Cancel all in-flight and queued work
    ///
    /// Every still-registered observer receives `FetchError::Cancelled`.
    pub async fn cancel_all(&self) {
        let drained = {
            let mut observers = self.shared.state.lock().await;
            observers.drain_all()
        };
        self.shared.download_pool.cancel_all();
        self.shared.render_pool.cancel_all();

        for (request, callbacks) in drained {
            self.shared
                .send_notification(callbacks, FetchResult::new(request, Err(FetchError::Cancelled)));
        }
    }

    /// Cancel everything and flush the disk index
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_all().await;
        self.shared.disk.flush_index().await?;
        info!("fetch controller shut down");
        Ok(())
    }

    /// Network request counter, for tests and monitoring
    pub fn network_requests(&self) -> u64 {
        self.shared.client.requests_issued()
    }

    /// Disk store I/O counters
    pub fn disk_stats(&self) -> DiskStoreStats {
        self.shared.disk.stats()
    }

    /// Memory cache hit/miss counters
    pub fn memory_stats(&self) -> MemoryCacheStats {
        self.shared.memory.stats()
    }

    /// Number of records in the disk index
    pub async fn disk_entry_count(&self) -> usize {
        self.shared.disk.len().await
    }

    /// Number of bitmaps in the memory cache
    pub async fn memory_entry_count(&self) -> usize {
        self.shared.memory.len().await
    }
}

impl Shared {
    /// Submit the network-download path for a key
    ///
    /// The downloaded bytes are decoded inline in the same pooled task, the
    /// bitmap is write-through cached, raw bytes are persisted to disk off
    /// the notification path, and all current observers are notified.
    async fn queue_download(
        shared: &Arc<Shared>,
        request: Arc<ImageRequest>,
        mut metrics: FetchMetrics,
    ) {
        let cache_key = request.cache_key();
        let fallback_low = request.is_low_priority;

        let task_shared = Arc::clone(shared);
        let key = cache_key.clone();
        let job = async move {
            match Self::download_and_decode(&task_shared, &request, &mut metrics).await {
                Ok((bitmap, bytes)) => {
                    task_shared
                        .memory
                        .put(key.clone(), Arc::clone(&bitmap))
                        .await;
                    task_shared
                        .notify(&key, FetchResult::new(Arc::clone(&request), Ok(bitmap)))
                        .await;
                    metrics.report(FulfillmentType::Downloaded);

                    // Disk persistence stays off the notification path.
                    let persist_shared = Arc::clone(&task_shared);
                    tokio::spawn(async move {
                        if let Err(e) = persist_shared.disk.write(&bytes, &request).await {
                            warn!("failed to persist image to disk: {}", e);
                        }
                    });
                }
                Err(error) => {
                    task_shared
                        .notify(&key, FetchResult::new(request, Err(error)))
                        .await;
                }
            }
        };

        // Read the effective priority and submit under the state lock so a
        // joiner's promotion cannot fall between the two.
        let observers = shared.state.lock().await;
        let priority = if observers.is_low_priority(&cache_key).unwrap_or(fallback_low) {
            Priority::Low
        } else {
            Priority::Normal
        };
        shared.download_pool.submit(&cache_key, priority, job);
    }

    async fn download_and_decode(
        shared: &Arc<Shared>,
        request: &Arc<ImageRequest>,
        metrics: &mut FetchMetrics,
    ) -> std::result::Result<(Arc<Bitmap>, Vec<u8>), FetchError> {
        let download_started = Instant::now();
        let bytes = shared.client.fetch_bytes(&request.url).await?;
        metrics.download_time = Some(download_started.elapsed());
        metrics.bytes = bytes.len();

        let render_started = Instant::now();
        let sizes = request.usable_size_metrics();
        let (decoded, bytes) = tokio::task::spawn_blocking(move || {
            let decoded = decode_and_resize(&bytes, sizes);
            (decoded, bytes)
        })
        .await
        .map_err(|_| FetchError::CorruptImage)?;
        metrics.render_time = Some(render_started.elapsed());

        Ok((Arc::new(decoded?), bytes))
    }

    /// Submit the disk-decode path for a key
    ///
    /// A missing file behind the index record self-heals: the stale record is
    /// purged and the flow falls back to the network path, invisible to the
    /// caller beyond added latency.
    async fn queue_render(
        shared: &Arc<Shared>,
        request: Arc<ImageRequest>,
        record: CachedImageRecord,
        mut metrics: FetchMetrics,
    ) {
        let cache_key = request.cache_key();
        let fallback_low = request.is_low_priority;

        let task_shared = Arc::clone(shared);
        let key = cache_key.clone();
        let job = async move {
            let read_started = Instant::now();
            let bytes = match task_shared.disk.read(&record).await {
                Ok(bytes) => bytes,
                Err(CacheError::FileMissing { path }) => {
                    warn!(path = %path.display(), "indexed file missing, falling back to network");
                    task_shared.disk.remove_record(&request.disk_cache_key()).await;
                    Self::queue_download(&task_shared, request, metrics).await;
                    return;
                }
                Err(e) => {
                    warn!("disk read failed, falling back to network: {}", e);
                    Self::queue_download(&task_shared, request, metrics).await;
                    return;
                }
            };
            metrics.disk_read_time = Some(read_started.elapsed());

            let render_started = Instant::now();
            let sizes = request.usable_size_metrics();
            let decoded = tokio::task::spawn_blocking(move || decode_and_resize(&bytes, sizes))
                .await
                .map_err(|_| FetchError::CorruptImage)
                .and_then(|r| r);
            metrics.render_time = Some(render_started.elapsed());

            match decoded {
                Ok(bitmap) => {
                    let bitmap = Arc::new(bitmap);
                    task_shared
                        .memory
                        .put(key.clone(), Arc::clone(&bitmap))
                        .await;
                    task_shared
                        .notify(&key, FetchResult::new(request, Ok(bitmap)))
                        .await;
                    metrics.report(FulfillmentType::DiskCache);
                }
                Err(error) => {
                    // Corrupt bytes on disk are reported distinctly so the
                    // caller can purge and re-fetch.
                    task_shared
                        .notify(&key, FetchResult::new(request, Err(error)))
                        .await;
                }
            }
        };

        let observers = shared.state.lock().await;
        let priority = if observers.is_low_priority(&cache_key).unwrap_or(fallback_low) {
            Priority::Low
        } else {
            Priority::Normal
        };
        shared.render_pool.submit(&cache_key, priority, job);
    }

    /// Drain and invoke every observer for a key exactly once, then clear the
    /// key's operation handles
    async fn notify(&self, cache_key: &str, result: FetchResult) {
        let callbacks = {
            let mut observers = self.state.lock().await;
            observers.drain(cache_key)
        };
        self.download_pool.release(cache_key);
        self.render_pool.release(cache_key);

        if callbacks.is_empty() {
            // Cancelled after the point of no return; discard the result.
            debug!(key = %cache_key, "result discarded, no observers remain");
            return;
        }
        self.send_notification(callbacks, result);
    }

    fn send_notification(&self, callbacks: Vec<FetchCallback>, result: FetchResult) {
        if self
            .notifier
            .send(Notification { callbacks, result })
            .is_err()
        {
            warn!("notification task gone, dropping result");
        }
    }
}
