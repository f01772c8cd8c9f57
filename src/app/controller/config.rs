//! Fetch controller configuration
//!
//! One `FetcherOptions` value per controller instance. Instances are fully
//! independent: separate cache namespaces, separate pools, no globals.

use std::path::PathBuf;

use crate::app::client::ClientConfig;
use crate::constants::{cache, memory, pools};
use crate::errors::{CacheError, CacheResult, OptionsError};

/// Configuration for a fetch controller instance
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    /// Cache namespace; becomes a directory name under the cache root
    pub cache_name: String,
    /// Explicit cache root (OS cache directory if None)
    pub cache_root: Option<PathBuf>,
    /// Maximum concurrent network downloads
    pub max_concurrent_fetches: usize,
    /// Maximum concurrent decode/resize operations
    pub max_concurrent_renders: usize,
    /// Index insertions between flushes of the disk index blob
    pub saves_between_index_flushes: usize,
    /// Decoded bitmaps held in the memory cache
    pub memory_cache_capacity: usize,
    /// HTTP client tuning
    pub client: ClientConfig,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            cache_name: "default".to_string(),
            cache_root: None,
            max_concurrent_fetches: pools::MAX_CONCURRENT_FETCHES,
            max_concurrent_renders: pools::MAX_CONCURRENT_RENDERS,
            saves_between_index_flushes: cache::SAVES_BETWEEN_INDEX_FLUSHES,
            memory_cache_capacity: memory::DEFAULT_CAPACITY,
            client: ClientConfig::default(),
        }
    }
}

impl FetcherOptions {
    /// Options rooted at an explicit cache directory (used by tests and by
    /// callers that manage their own storage layout)
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Set the cache namespace
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the download pool size
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// Set the decode/resize pool size
    pub fn with_max_concurrent_renders(mut self, max: usize) -> Self {
        self.max_concurrent_renders = max;
        self
    }

    /// Set the index flush batch size
    pub fn with_saves_between_index_flushes(mut self, saves: usize) -> Self {
        self.saves_between_index_flushes = saves;
        self
    }

    /// Set the memory cache capacity
    pub fn with_memory_cache_capacity(mut self, capacity: usize) -> Self {
        self.memory_cache_capacity = capacity;
        self
    }

    /// Set the HTTP client configuration
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (field, value) in [
            ("max_concurrent_fetches", self.max_concurrent_fetches),
            ("max_concurrent_renders", self.max_concurrent_renders),
            ("saves_between_index_flushes", self.saves_between_index_flushes),
            ("memory_cache_capacity", self.memory_cache_capacity),
        ] {
            if value == 0 {
                return Err(OptionsError::InvalidValue {
                    field,
                    value: value.to_string(),
                    reason: "must be non-zero",
                });
            }
        }
        Ok(())
    }

    /// Directory holding this instance's raw images and index blob
    pub fn resolved_cache_root(&self) -> CacheResult<PathBuf> {
        match &self.cache_root {
            Some(root) => Ok(root.join(&self.cache_name)),
            None => {
                let base = dirs::cache_dir().ok_or_else(|| CacheError::DirectoryNotAccessible {
                    path: PathBuf::from("system cache directory"),
                })?;
                Ok(base.join(cache::CACHE_DIR_NAME).join(&self.cache_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let options = FetcherOptions::default();
        assert_eq!(options.max_concurrent_fetches, 6);
        assert_eq!(options.max_concurrent_renders, 6);
        assert_eq!(options.saves_between_index_flushes, 20);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let options = FetcherOptions::default().with_max_concurrent_fetches(0);
        assert!(options.validate().is_err());

        let options = FetcherOptions::default().with_saves_between_index_flushes(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_cache_root_includes_namespace() {
        let options = FetcherOptions::with_cache_root(PathBuf::from("/tmp/px"))
            .with_cache_name("feed-thumbnails");
        let root = options.resolved_cache_root().unwrap();
        assert_eq!(root, PathBuf::from("/tmp/px/feed-thumbnails"));
    }

    #[test]
    fn test_distinct_namespaces_do_not_collide() {
        let a = FetcherOptions::with_cache_root(PathBuf::from("/tmp/px")).with_cache_name("a");
        let b = FetcherOptions::with_cache_root(PathBuf::from("/tmp/px")).with_cache_name("b");
        assert_ne!(
            a.resolved_cache_root().unwrap(),
            b.resolved_cache_root().unwrap()
        );
    }
}
