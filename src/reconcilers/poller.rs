//! Completion poller
//!
//! After a dependent object is submitted, a poller per key checks its
//! readiness on a fixed interval until it is ready, the timeout elapses, or
//! the poller is cancelled. Pollers are spawned through a [`PollerRegistry`]
//! so shutdown can cancel and await every one of them.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::error::Result;
use crate::metrics;
use crate::queue::ObjectKey;

/// How a poll loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollResult {
    Ready,
    TimedOut,
    Cancelled,
}

impl PollResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollResult::Ready => "ready",
            PollResult::TimedOut => "timeout",
            PollResult::Cancelled => "cancelled",
        }
    }
}

/// Run `check` every `policy.interval` until it returns `true`.
///
/// The first check happens one interval after the call. The loop gives up
/// with [`PollResult::TimedOut`] after the first check at or past
/// `policy.timeout`. Check errors are logged and count as not ready. A check
/// still in flight when `cancel` fires is abandoned.
pub async fn poll_until_ready<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> PollResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollResult::Cancelled,
            _ = ticker.tick() => {}
        }

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollResult::Cancelled,
            ready = check() => ready,
        };

        match ready {
            Ok(true) => return PollResult::Ready,
            Ok(false) => debug!("Dependent resource not ready yet"),
            Err(e) => warn!(error = %e, "Readiness check failed"),
        }

        if Instant::now() >= deadline {
            return PollResult::TimedOut;
        }
    }
}

/// Supervised set of in-flight pollers, at most one per key
pub struct PollerRegistry {
    kind: &'static str,
    root: CancellationToken,
    tracker: TaskTracker,
    active: Mutex<HashSet<ObjectKey>>,
}

impl PollerRegistry {
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Spawn `task` for `key` unless a poller for it is already running.
    ///
    /// The task receives a token cancelled on [`shutdown`](Self::shutdown).
    /// Returns whether a task was spawned.
    pub async fn spawn<F, Fut>(self: &Arc<Self>, key: ObjectKey, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock().await;
        if self.root.is_cancelled() {
            debug!(kind = self.kind, key = %key, "Registry is shut down, not starting poller");
            return false;
        }
        if active.contains(&key) {
            debug!(kind = self.kind, key = %key, "Poller already running");
            return false;
        }

        let token = self.root.child_token();
        active.insert(key.clone());
        metrics::ACTIVE_POLLERS
            .with_label_values(&[self.kind])
            .set(active.len() as f64);

        let registry = Arc::clone(self);
        let future = task(token);
        self.tracker.spawn(async move {
            future.await;
            let mut active = registry.active.lock().await;
            active.remove(&key);
            metrics::ACTIVE_POLLERS
                .with_label_values(&[registry.kind])
                .set(active.len() as f64);
        });
        true
    }

    pub async fn is_active(&self, key: &ObjectKey) -> bool {
        self.active.lock().await.contains(key)
    }

    /// Number of pollers still running
    pub async fn active(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Cancel every poller and wait for all of them to exit
    pub async fn shutdown(&self) {
        let outstanding = self.active().await;
        info!(kind = self.kind, outstanding, "Cancelling completion pollers");
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
