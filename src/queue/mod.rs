//! Deduplicating work queue with per-key retry backoff
//!
//! A key is in at most one of two places at any time: waiting in the queue,
//! or being processed by a worker. Enqueuing a key that is already waiting
//! is a no-op; enqueuing a key that is being processed marks it dirty so it
//! is queued again once the worker calls [`WorkQueue::mark_done`].

mod key;

pub use key::ObjectKey;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::BackoffPolicy;
use crate::metrics;

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<ObjectKey>,
    /// Keys currently held by a worker
    processing: HashSet<ObjectKey>,
    /// Consecutive failures per key
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Deduplicating, rate-limited queue of reconciliation keys
pub struct WorkQueue {
    name: String,
    backoff: BackoffPolicy,
    state: Mutex<QueueState>,
    available: Notify,
    shutdown: CancellationToken,
    delayed: TaskTracker,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, backoff: BackoffPolicy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            backoff,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            shutdown: CancellationToken::new(),
            delayed: TaskTracker::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a key, coalescing with any outstanding instance of it
    pub async fn enqueue(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            debug!(queue = %self.name, key = %key, "Queue is shutting down, ignoring key");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            // Re-queued by mark_done
            return;
        }
        state.queue.push_back(key);
        metrics::QUEUE_DEPTH
            .with_label_values(&[&self.name])
            .set(state.queue.len() as f64);
        drop(state);
        self.available.notify_one();
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down and drained.
    pub async fn dequeue(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::QUEUE_DEPTH
                        .with_label_values(&[&self.name])
                        .set(state.queue.len() as f64);
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by [`dequeue`](Self::dequeue).
    ///
    /// Must be called exactly once per dequeue. A key that was enqueued again
    /// while it was being processed goes back on the queue.
    pub async fn mark_done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            metrics::QUEUE_DEPTH
                .with_label_values(&[&self.name])
                .set(state.queue.len() as f64);
            drop(state);
            self.available.notify_one();
        }
    }

    /// Schedule the key again after a delay that grows with consecutive failures
    pub async fn retry(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            self.backoff.delay_for(*failures)
        };

        metrics::QUEUE_RETRIES.with_label_values(&[&self.name]).inc();

        let queue = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        self.delayed.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.enqueue(key).await,
            }
        });

        delay
    }

    /// Reset the failure count of a key after it was processed successfully
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for a key
    pub async fn failures(&self, key: &ObjectKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of keys waiting to be dequeued
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting keys and wake every blocked dequeuer.
    ///
    /// Keys already queued are still handed out; pending retries are dropped.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        info!(queue = %self.name, "Shutting down work queue");
        self.shutdown.cancel();
        self.delayed.close();
        self.available.notify_waiters();
        self.delayed.wait().await;
    }
}
