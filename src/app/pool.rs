//! Bounded worker pools with priority bands and per-key cancellation
//!
//! Each pool runs at most `max_concurrency` jobs at once. Jobs beyond the
//! limit wait in one of two bands; normal-priority work always dispatches
//! before low-priority work. Jobs are keyed by cache key so the controller can
//! promote or cancel the single in-flight operation for a key. Promotion never
//! demotes. Cancellation is best-effort: a queued job is dropped outright, a
//! running job is aborted at its next suspension point.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Scheduling priority for a pooled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
}

struct QueuedJob {
    key: String,
    id: u64,
    fut: BoxFuture<'static, ()>,
}

struct RunningJob {
    id: u64,
    abort: AbortHandle,
    priority: Priority,
}

#[derive(Default)]
struct PoolState {
    normal: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
    running: HashMap<String, RunningJob>,
    active: usize,
    next_id: u64,
}

/// Fixed-size pool of keyed jobs
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    max_concurrency: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(name: &'static str, max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                max_concurrency: max_concurrency.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Submit a job for a key, running it now if a slot is free
    ///
    /// The controller guarantees at most one outstanding operation per key;
    /// a duplicate key submission is dropped with a log line.
    pub fn submit<F>(&self, key: &str, priority: Priority, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        if state.running.contains_key(key)
            || queued_position(&state.normal, key).is_some()
            || queued_position(&state.low, key).is_some()
        {
            debug!(pool = self.inner.name, key = %key, "duplicate job submission dropped");
            return;
        }

        state.next_id += 1;
        let job = QueuedJob {
            key: key.to_string(),
            id: state.next_id,
            fut: Box::pin(fut),
        };

        if state.active < self.inner.max_concurrency {
            spawn_job(&self.inner, &mut state, job, priority);
        } else {
            trace!(pool = self.inner.name, key = %key, ?priority, "job queued");
            match priority {
                Priority::Normal => state.normal.push_back(job),
                Priority::Low => state.low.push_back(job),
            }
        }
    }

    /// Raise a key's job to normal priority; never lowers it
    pub fn promote(&self, key: &str) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        if let Some(running) = state.running.get_mut(key) {
            if running.priority == Priority::Low {
                running.priority = Priority::Normal;
                debug!(pool = self.inner.name, key = %key, "promoted running job");
            }
            return;
        }
        if let Some(pos) = queued_position(&state.low, key) {
            let job = state.low.remove(pos).expect("position just found");
            state.normal.push_back(job);
            debug!(pool = self.inner.name, key = %key, "promoted queued job");
        }
    }

    /// Current priority of a key's job, if one is queued or running
    pub fn priority_of(&self, key: &str) -> Option<Priority> {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        if let Some(running) = state.running.get(key) {
            return Some(running.priority);
        }
        if queued_position(&state.normal, key).is_some() {
            return Some(Priority::Normal);
        }
        if queued_position(&state.low, key).is_some() {
            return Some(Priority::Low);
        }
        None
    }

    /// Cancel the job for a key: drop it if queued, abort it if running
    pub fn cancel(&self, key: &str) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        if let Some(pos) = queued_position(&state.normal, key) {
            state.normal.remove(pos);
            debug!(pool = self.inner.name, key = %key, "dropped queued job");
            return;
        }
        if let Some(pos) = queued_position(&state.low, key) {
            state.low.remove(pos);
            debug!(pool = self.inner.name, key = %key, "dropped queued job");
            return;
        }
        if let Some(running) = state.running.remove(key) {
            running.abort.abort();
            debug!(pool = self.inner.name, key = %key, "aborted running job");
        }
    }

    /// Mark a key's job finished without aborting it
    ///
    /// Called once the job's result has been delivered; clears the handle so
    /// a later fetch for the same key can start fresh work.
    pub fn release(&self, key: &str) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        state.running.remove(key);
    }

    /// Cancel everything: queued jobs dropped, running jobs aborted
    pub fn cancel_all(&self) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        let queued = state.normal.len() + state.low.len();
        state.normal.clear();
        state.low.clear();
        for (_, running) in state.running.drain() {
            running.abort.abort();
        }
        if queued > 0 {
            debug!(pool = self.inner.name, queued, "cancelled all jobs");
        }
    }

    /// Number of jobs waiting for a slot
    pub fn queued_len(&self) -> usize {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        state.normal.len() + state.low.len()
    }

    /// Number of jobs currently holding a slot
    pub fn active_len(&self) -> usize {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        state.active
    }
}

fn queued_position(queue: &VecDeque<QueuedJob>, key: &str) -> Option<usize> {
    queue.iter().position(|job| job.key == key)
}

fn spawn_job(inner: &Arc<PoolInner>, state: &mut PoolState, job: QueuedJob, priority: Priority) {
    let QueuedJob { key, id, fut } = job;
    state.active += 1;

    let guard = SlotGuard {
        inner: Arc::clone(inner),
        key: key.clone(),
        id,
    };
    let handle = tokio::spawn(async move {
        let _slot = guard;
        fut.await;
    });

    trace!(pool = inner.name, key = %key, "job started");
    state.running.insert(
        key,
        RunningJob {
            id,
            abort: handle.abort_handle(),
            priority,
        },
    );
}

/// Frees a slot exactly once, whether the job finished or was aborted
struct SlotGuard {
    inner: Arc<PoolInner>,
    key: String,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        state.active = state.active.saturating_sub(1);
        if state
            .running
            .get(&self.key)
            .is_some_and(|running| running.id == self.id)
        {
            state.running.remove(&self.key);
        }

        if state.active >= self.inner.max_concurrency {
            return;
        }
        let next = match state.normal.pop_front() {
            Some(job) => Some((job, Priority::Normal)),
            None => state.low.pop_front().map(|job| (job, Priority::Low)),
        };
        if let Some((job, priority)) = next {
            // Outside a runtime (teardown) there is nothing left to run the
            // queued job on; dropping it is the correct outcome.
            if Handle::try_current().is_ok() {
                spawn_job(&self.inner, &mut state, job, priority);
            }
        }
    }
}
