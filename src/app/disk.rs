//! Disk store for raw image bytes
//!
//! Persists downloaded bytes keyed by disk cache key, one file per image plus
//! a single JSON index blob. File I/O is serialized through one store-level
//! lock so concurrent writes never interleave. The in-memory index is
//! authoritative for the process lifetime; it is flushed to disk in batches
//! (every K insertions, not on every write) and loaded once at startup. A
//! failed flush is logged, swallowed, and retried at the next batch boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::request::{ImageRequest, SizeMetrics};
use crate::constants::cache;
use crate::errors::{CacheError, CacheResult};

/// One entry per disk-cached raw image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImageRecord {
    /// Disk cache key this record belongs to
    pub identifier: String,
    /// File name relative to the store root
    pub path: String,
    /// When the bytes were fetched
    pub date_fetched: DateTime<Utc>,
    /// Sizing the bytes were fetched for, when known
    pub size_metrics: Option<SizeMetrics>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<String, CachedImageRecord>,
    adds_since_flush: usize,
}

/// Raw-byte store with a batched, persisted index
pub struct DiskStore {
    root: PathBuf,
    saves_between_flushes: usize,
    index: Mutex<IndexState>,
    /// Serializes all file I/O for this store
    io_lock: Mutex<()>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl DiskStore {
    /// Open a store rooted at `root`, creating the directory and loading the
    /// persisted index if one exists
    pub async fn open(root: PathBuf, saves_between_flushes: usize) -> CacheResult<Self> {
        ensure_directory_exists(&root).await?;

        let store = Self {
            root,
            saves_between_flushes: saves_between_flushes.max(1),
            index: Mutex::new(IndexState::default()),
            io_lock: Mutex::new(()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        };
        store.load_index().await;
        Ok(store)
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist raw bytes for a request and record them in the index
    pub async fn write(&self, bytes: &[u8], request: &ImageRequest) -> CacheResult<CachedImageRecord> {
        let disk_key = request.disk_cache_key();
        let file_name = format!("{}{}", sanitize_key(&disk_key), cache::IMAGE_FILE_SUFFIX);
        let final_path = self.root.join(&file_name);

        {
            let _io = self.io_lock.lock().await;
            write_atomic(&final_path, bytes).await?;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %disk_key, bytes = bytes.len(), "wrote raw image to disk");

        let record = CachedImageRecord {
            identifier: disk_key.clone(),
            path: file_name,
            date_fetched: Utc::now(),
            size_metrics: request.size_metrics,
        };
        self.add_record(disk_key, record.clone()).await;
        Ok(record)
    }

    /// Read raw bytes back for a record
    ///
    /// Returns `CacheError::FileMissing` when the index and the disk disagree,
    /// so the caller can self-heal.
    pub async fn read(&self, record: &CachedImageRecord) -> CacheResult<Vec<u8>> {
        let path = self.root.join(&record.path);
        let _io = self.io_lock.lock().await;
        match fs::read(&path).await {
            Ok(bytes) => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::FileMissing { path })
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Look up the record for a disk cache key
    pub async fn lookup(&self, disk_key: &str) -> Option<CachedImageRecord> {
        let index = self.index.lock().await;
        index.entries.get(disk_key).cloned()
    }

    /// Remove a stale record from the index (index/disk mismatch self-heal)
    pub async fn remove_record(&self, disk_key: &str) {
        let mut index = self.index.lock().await;
        if index.entries.remove(disk_key).is_some() {
            warn!(key = %disk_key, "removed stale disk index record");
        }
    }

    /// Number of records currently indexed
    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    /// Whether the index is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delete every cached file and the index blob; safe to call repeatedly
    pub async fn delete_all(&self) -> CacheResult<()> {
        {
            let mut index = self.index.lock().await;
            index.entries.clear();
            index.adds_since_flush = 0;
        }
        let _io = self.io_lock.lock().await;
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Io(e)),
        }
        ensure_directory_exists(&self.root).await?;
        info!(root = %self.root.display(), "cleared on-disk cache");
        Ok(())
    }

    /// Force the index blob to disk now
    pub async fn flush_index(&self) -> CacheResult<()> {
        let snapshot = {
            let mut index = self.index.lock().await;
            index.adds_since_flush = 0;
            index.entries.clone()
        };
        let _io = self.io_lock.lock().await;
        let bytes = serde_json::to_vec(&snapshot)?;
        write_atomic(&self.index_path(), &bytes).await?;
        debug!(entries = snapshot.len(), "flushed disk index");
        Ok(())
    }

    /// I/O counters since the store was opened
    pub fn stats(&self) -> DiskStoreStats {
        DiskStoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    async fn add_record(&self, disk_key: String, record: CachedImageRecord) {
        let due = {
            let mut index = self.index.lock().await;
            index.entries.insert(disk_key, record);
            index.adds_since_flush += 1;
            index.adds_since_flush >= self.saves_between_flushes
        };
        if due {
            // Flush failures stay logged-and-swallowed: the in-memory index
            // remains authoritative and the counter is only reset on success,
            // so the next batch boundary retries.
            if let Err(e) = self.flush_index().await {
                warn!("disk index flush failed, will retry next batch: {}", e);
                let mut index = self.index.lock().await;
                index.adds_since_flush = self.saves_between_flushes;
            }
        }
    }

    async fn load_index(&self) {
        let path = self.index_path();
        let _io = self.io_lock.lock().await;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("could not read disk index, starting empty: {}", e);
                return;
            }
        };
        match serde_json::from_slice::<HashMap<String, CachedImageRecord>>(&bytes) {
            Ok(entries) => {
                info!(entries = entries.len(), "loaded disk index");
                let mut index = self.index.lock().await;
                index.entries = entries;
            }
            Err(e) => warn!("disk index corrupt, starting empty: {}", e),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(cache::INDEX_FILE_NAME)
    }
}

/// Counters for disk store activity, used by tests to observe I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStoreStats {
    pub reads: u64,
    pub writes: u64,
}

/// Write with the temp-file + rename pattern so interrupted writes never leave
/// a partial file behind
async fn write_atomic(final_path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let temp_path = final_path.with_extension(format!(
        "{}{}",
        final_path.extension().unwrap_or_default().to_string_lossy(),
        cache::TEMP_FILE_SUFFIX
    ));
    fs::write(&temp_path, bytes).await?;
    if let Err(e) = fs::rename(&temp_path, final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CacheError::Io(e));
    }
    Ok(())
}

async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .await
            .map_err(|_| CacheError::DirectoryNotAccessible {
                path: path.to_path_buf(),
            })?;
        debug!("created cache directory: {}", path.display());
    }
    Ok(())
}

/// Map a disk cache key onto a safe file name
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
