//! End-to-end pipeline tests against an in-process HTTP server

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::*;
use crate::app::pool::Priority;
use crate::app::request::{Dimensions, SizeMetrics};

/// Minimal HTTP server handing out one fixed response per connection
struct TestServer {
    address: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    async fn spawn(status_line: &'static str, body: Vec<u8>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let hit_counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                hit_counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let mut seen = Vec::new();
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                seen.extend_from_slice(&buf[..n]);
                                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    sleep(delay).await;
                    let header = format!(
                        "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status_line,
                        body.len()
                    );
                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                });
            }
        });

        Self { address, hits }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.address, path)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([90, 120, 30, 255]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buf, image::ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn channel_callback() -> (FetchCallback, mpsc::UnboundedReceiver<FetchResult>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
        rx,
    )
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

async fn controller_with_root(temp: &TempDir) -> FetchController {
    init_tracing();
    FetchController::new(
        FetcherOptions::with_cache_root(temp.path().to_path_buf())
            .with_saves_between_index_flushes(1),
    )
    .await
    .unwrap()
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test]
async fn test_download_decodes_resizes_and_caches() {
    let server = TestServer::spawn("200 OK", png_bytes(256, 128), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;

    let request = ImageRequest::new(server.url("cat.png"), "cat-1").with_size_metrics(
        SizeMetrics::new(Dimensions::new(64, 32), Dimensions::new(256, 128)),
    );
    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;

    let result = rx.recv().await.unwrap();
    let bitmap = result.outcome.unwrap();
    assert_eq!((bitmap.width(), bitmap.height()), (64, 32));
    assert_eq!(controller.network_requests(), 1);
    assert_eq!(controller.memory_entry_count().await, 1);

    // Raw bytes are persisted off the notification path
    let c = &controller;
    wait_until(move || async move { c.disk_entry_count().await == 1 }).await;
}

#[tokio::test]
async fn test_memory_hit_bypasses_network_and_disk() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("a.png"), "img-a");

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request.clone(), callback).await;
    rx.recv().await.unwrap().outcome.unwrap();

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;
    assert!(rx.recv().await.unwrap().outcome.is_ok());

    assert_eq!(controller.network_requests(), 1);
    assert_eq!(controller.memory_stats().hits, 1);
    assert_eq!(controller.disk_stats().reads, 0);
}

#[tokio::test]
async fn test_concurrent_observers_share_one_download() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::from_millis(300)).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("a.png"), "img-a");

    let mut receivers = Vec::new();
    for _ in 0..4 {
        let (callback, rx) = channel_callback();
        controller.fetch_image(request.clone(), callback).await;
        receivers.push(rx);
    }

    let mut bitmaps = Vec::new();
    for mut rx in receivers {
        bitmaps.push(rx.recv().await.unwrap().outcome.unwrap());
    }

    assert_eq!(controller.network_requests(), 1);
    assert_eq!(server.hits(), 1);
    // Every observer gets the same shared decode, not a copy
    assert!(bitmaps.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_disk_hit_skips_network() {
    let server = TestServer::spawn("200 OK", png_bytes(256, 128), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("cat.png"), "cat-1").with_size_metrics(
        SizeMetrics::new(Dimensions::new(64, 32), Dimensions::new(256, 128)),
    );

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request.clone(), callback).await;
    rx.recv().await.unwrap().outcome.unwrap();
    let c = &controller;
    wait_until(move || async move { c.disk_entry_count().await == 1 }).await;

    controller.clear_memory_cache().await;

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;
    let bitmap = rx.recv().await.unwrap().outcome.unwrap();

    assert_eq!((bitmap.width(), bitmap.height()), (64, 32));
    assert_eq!(controller.network_requests(), 1);
    assert!(controller.disk_stats().reads >= 1);
}

#[tokio::test]
async fn test_missing_disk_file_self_heals_via_network() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("a.png"), "img-a");

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request.clone(), callback).await;
    rx.recv().await.unwrap().outcome.unwrap();
    let c = &controller;
    wait_until(move || async move { c.disk_entry_count().await == 1 }).await;

    // Delete the raw file behind the index record out of band
    let cache_dir = temp.path().join("default");
    let mut removed = false;
    for entry in std::fs::read_dir(&cache_dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name().to_string_lossy().ends_with(".imagedata") {
            std::fs::remove_file(entry.path()).unwrap();
            removed = true;
        }
    }
    assert!(removed);

    controller.clear_memory_cache().await;

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;
    assert!(rx.recv().await.unwrap().outcome.is_ok());
    assert_eq!(controller.network_requests(), 2);
}

#[tokio::test]
async fn test_joining_normal_fetch_promotes_low_priority_job() {
    init_tracing();
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::from_millis(400)).await;
    let temp = TempDir::new().unwrap();
    let controller = FetchController::new(
        FetcherOptions::with_cache_root(temp.path().to_path_buf()).with_max_concurrent_fetches(1),
    )
    .await
    .unwrap();

    // Occupy the single download slot
    let blocker = ImageRequest::new(server.url("a.png"), "img-a");
    let (callback, mut rx_a) = channel_callback();
    controller.fetch_image(blocker, callback).await;

    // A prefetch queues behind it at low priority
    let prefetch = ImageRequest::new(server.url("b.png"), "img-b").with_low_priority(true);
    let (callback, mut rx_b) = channel_callback();
    controller.fetch_image(prefetch.clone(), callback).await;
    assert_eq!(
        controller.shared.download_pool.priority_of(&prefetch.cache_key()),
        Some(Priority::Low)
    );

    // An on-screen caller joins the same key; the queued job is promoted
    let urgent = prefetch.clone().with_low_priority(false);
    let (callback, mut rx_c) = channel_callback();
    controller.fetch_image(urgent, callback).await;
    assert_eq!(
        controller.shared.download_pool.priority_of(&prefetch.cache_key()),
        Some(Priority::Normal)
    );

    assert!(rx_a.recv().await.unwrap().outcome.is_ok());
    assert!(rx_b.recv().await.unwrap().outcome.is_ok());
    assert!(rx_c.recv().await.unwrap().outcome.is_ok());
    // One download per distinct key, no matter how many observers
    assert_eq!(controller.network_requests(), 2);
}

#[tokio::test]
async fn test_last_observer_removal_cancels_and_allows_refetch() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::from_millis(300)).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("a.png"), "img-a");

    let (callback, mut rx) = channel_callback();
    let token = controller.fetch_image(request.clone(), callback).await;
    controller.remove_observer(&request, &token).await;

    // The callback is dropped without firing
    assert!(rx.recv().await.is_none());
    assert_eq!(controller.memory_entry_count().await, 0);

    // The key is free for fresh work afterwards
    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;
    assert!(rx.recv().await.unwrap().outcome.is_ok());
}

#[tokio::test]
async fn test_cancel_all_notifies_cancelled() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::from_millis(500)).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;

    let (callback, mut rx_a) = channel_callback();
    controller
        .fetch_image(ImageRequest::new(server.url("a.png"), "img-a"), callback)
        .await;
    let (callback, mut rx_b) = channel_callback();
    controller
        .fetch_image(ImageRequest::new(server.url("b.png"), "img-b"), callback)
        .await;

    controller.cancel_all().await;

    let result = rx_a.recv().await.unwrap();
    assert_eq!(result.outcome.unwrap_err(), FetchError::Cancelled);
    let result = rx_b.recv().await.unwrap();
    assert_eq!(result.outcome.unwrap_err(), FetchError::Cancelled);
}

#[tokio::test]
async fn test_404_reported_as_not_found() {
    let server = TestServer::spawn("404 Not Found", Vec::new(), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;

    let (callback, mut rx) = channel_callback();
    controller
        .fetch_image(ImageRequest::new(server.url("gone.png"), "img-gone"), callback)
        .await;

    let result = rx.recv().await.unwrap();
    assert_eq!(result.outcome.unwrap_err(), FetchError::NotFound { status: 404 });
    assert_eq!(controller.memory_entry_count().await, 0);
}

#[tokio::test]
async fn test_undecodable_body_reported_as_corrupt() {
    let server =
        TestServer::spawn("200 OK", b"this is not an image".to_vec(), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;

    let (callback, mut rx) = channel_callback();
    controller
        .fetch_image(ImageRequest::new(server.url("bad.png"), "img-bad"), callback)
        .await;

    let result = rx.recv().await.unwrap();
    assert_eq!(result.outcome.unwrap_err(), FetchError::CorruptImage);
}

#[tokio::test]
async fn test_clear_caches_resets_both_layers() {
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let controller = controller_with_root(&temp).await;
    let request = ImageRequest::new(server.url("a.png"), "img-a");

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request.clone(), callback).await;
    rx.recv().await.unwrap().outcome.unwrap();
    let c = &controller;
    wait_until(move || async move { c.disk_entry_count().await == 1 }).await;

    controller.clear_caches().await.unwrap();
    assert_eq!(controller.memory_entry_count().await, 0);
    assert_eq!(controller.disk_entry_count().await, 0);

    // Safe to clear an already-empty cache
    controller.clear_caches().await.unwrap();

    let (callback, mut rx) = channel_callback();
    controller.fetch_image(request, callback).await;
    assert!(rx.recv().await.unwrap().outcome.is_ok());
    assert_eq!(controller.network_requests(), 2);
}

#[tokio::test]
async fn test_shutdown_flushes_index_for_reopen() {
    init_tracing();
    let server = TestServer::spawn("200 OK", png_bytes(64, 64), Duration::ZERO).await;
    let temp = TempDir::new().unwrap();
    let options = FetcherOptions::with_cache_root(temp.path().to_path_buf())
        .with_saves_between_index_flushes(100);
    let controller = FetchController::new(options.clone()).await.unwrap();

    let (callback, mut rx) = channel_callback();
    controller
        .fetch_image(ImageRequest::new(server.url("a.png"), "img-a"), callback)
        .await;
    rx.recv().await.unwrap().outcome.unwrap();
    let c = &controller;
    wait_until(move || async move { c.disk_entry_count().await == 1 }).await;

    controller.shutdown().await.unwrap();

    let reopened = FetchController::new(options).await.unwrap();
    assert_eq!(reopened.disk_entry_count().await, 1);
}
