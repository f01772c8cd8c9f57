//! Observer registry for in-flight request de-duplication
//!
//! Maps a cache key to the set of callbacks waiting on it, keyed by
//! observation token. N callers waiting on the same key get exactly one unit
//! of work and all N callbacks. This struct holds no lock of its own: every
//! mutation goes through the controller's single state mutex, which is what
//! keeps registration, cancellation, and notification from racing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::request::{FetchCallback, ImageRequest};

struct KeyObservers {
    /// Request that opened this key; used to synthesize cancellation results
    request: Arc<ImageRequest>,
    /// Effective priority of the key's in-flight work; low only while every
    /// observer asked for low. Never drops back once raised.
    low_priority: bool,
    callbacks: HashMap<String, FetchCallback>,
}

/// Cache key -> (token -> callback) bookkeeping
#[derive(Default)]
pub struct ObserverRegistry {
    observers: HashMap<String, KeyObservers>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any caller is waiting on this key (a fetch is in flight)
    pub fn has_observers(&self, cache_key: &str) -> bool {
        self.observers.contains_key(cache_key)
    }

    /// Register a caller's interest in a key
    ///
    /// A normal-priority joiner raises the key's effective priority for good.
    pub fn add_observer(
        &mut self,
        cache_key: &str,
        request: Arc<ImageRequest>,
        token: String,
        callback: FetchCallback,
    ) {
        let joiner_low = request.is_low_priority;
        let for_key = self
            .observers
            .entry(cache_key.to_string())
            .or_insert_with(|| KeyObservers {
                low_priority: joiner_low,
                request,
                callbacks: HashMap::new(),
            });
        for_key.low_priority &= joiner_low;
        for_key.callbacks.insert(token, callback);
    }

    /// Effective priority of a key's in-flight work, if it has observers
    pub fn is_low_priority(&self, cache_key: &str) -> Option<bool> {
        self.observers
            .get(cache_key)
            .map(|for_key| for_key.low_priority)
    }

    /// Deregister one caller; returns true when it was the last observer for
    /// the key (the in-flight work should then be cancelled)
    pub fn remove_observer(&mut self, cache_key: &str, token: &str) -> bool {
        let Some(for_key) = self.observers.get_mut(cache_key) else {
            return false;
        };
        for_key.callbacks.remove(token);
        if for_key.callbacks.is_empty() {
            self.observers.remove(cache_key);
            true
        } else {
            false
        }
    }

    /// Drain every callback registered for a key, clearing its entry
    pub fn drain(&mut self, cache_key: &str) -> Vec<FetchCallback> {
        self.observers
            .remove(cache_key)
            .map(|for_key| for_key.callbacks.into_values().collect())
            .unwrap_or_default()
    }

    /// Drain every key, returning its opening request with its callbacks
    pub fn drain_all(&mut self) -> Vec<(Arc<ImageRequest>, Vec<FetchCallback>)> {
        self.observers
            .drain()
            .map(|(_, for_key)| {
                (
                    for_key.request,
                    for_key.callbacks.into_values().collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    /// Number of keys with at least one observer
    pub fn key_count(&self) -> usize {
        self.observers.len()
    }

    /// Number of observers waiting on a key
    pub fn observer_count(&self, cache_key: &str) -> usize {
        self.observers
            .get(cache_key)
            .map_or(0, |for_key| for_key.callbacks.len())
    }
}
