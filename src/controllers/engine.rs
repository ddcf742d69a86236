//! Reconciliation engine shared by the Backup and Restore controllers
//!
//! Watch events enqueue keys; a worker pulls keys one at a time and runs
//! [`Controller::reconcile`]. A successful submission hands the key to a
//! detached completion poller, so the worker is free for the next key while
//! the dependent object becomes ready.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{CreateOutcome, DependentResourceClient, ResourceStore};
use crate::config::{ControllerConfig, PollPolicy};
use crate::crd::{Progress, ProgressResource};
use crate::error::Error;
use crate::metrics;
use crate::queue::{ObjectKey, WorkQueue};
use crate::reconcilers::{poll_until_ready, KindPolicy, PollResult, PollerRegistry, StatusUpdater};

/// What a single reconciliation decided
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Dependent object submitted (or already in flight), completion is being polled
    Submitted,
    /// Progress is already terminal, nothing to do
    Complete,
    /// Key dropped without retry (deleted resource or terminal error)
    Dropped,
    /// Transient failure, key goes back on the queue with backoff
    Retry,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Submitted => "submitted",
            ReconcileOutcome::Complete => "complete",
            ReconcileOutcome::Dropped => "dropped",
            ReconcileOutcome::Retry => "retry",
        }
    }
}

/// Generic controller for one resource kind
pub struct Controller<P: KindPolicy> {
    policy: P,
    queue: Arc<WorkQueue>,
    store: Arc<dyn ResourceStore<P::Resource>>,
    dependents: Arc<dyn DependentResourceClient>,
    status: StatusUpdater<P::Resource>,
    pollers: Arc<PollerRegistry>,
    poll: PollPolicy,
}

impl<P: KindPolicy> Controller<P> {
    pub fn new(
        policy: P,
        config: &ControllerConfig,
        store: Arc<dyn ResourceStore<P::Resource>>,
        dependents: Arc<dyn DependentResourceClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy,
            queue: WorkQueue::new(config.queue_name.clone(), config.backoff),
            status: StatusUpdater::new(P::KIND, Arc::clone(&store)),
            store,
            dependents,
            pollers: PollerRegistry::new(P::KIND),
            poll: config.poll,
        })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn pollers(&self) -> &Arc<PollerRegistry> {
        &self.pollers
    }

    /// Watch callback for added or updated resources
    pub async fn on_add(&self, resource: &P::Resource) {
        let key = ObjectKey::from_resource(resource);
        if let Some(progress) = resource.progress().filter(Progress::is_terminal) {
            debug!(kind = P::KIND, key = %key, progress = %progress, "Ignoring completed resource");
            return;
        }
        debug!(kind = P::KIND, key = %key, "Enqueuing");
        self.queue.enqueue(key).await;
    }

    /// Reconcile a single key
    #[instrument(skip(self, key), fields(kind = P::KIND, key = %key))]
    pub async fn reconcile(self: &Arc<Self>, key: &ObjectKey) -> ReconcileOutcome {
        let _timer = metrics::RECONCILE_DURATION
            .with_label_values(&[P::KIND])
            .start_timer();

        let outcome = self.reconcile_key(key).await;
        metrics::RECONCILIATIONS
            .with_label_values(&[P::KIND, outcome.as_str()])
            .inc();
        outcome
    }

    async fn reconcile_key(self: &Arc<Self>, key: &ObjectKey) -> ReconcileOutcome {
        let resource = match self.store.get(key).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                info!("Resource no longer exists, dropping key");
                return ReconcileOutcome::Dropped;
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch resource, will retry");
                return ReconcileOutcome::Retry;
            }
        };

        if let Some(progress) = resource.progress().filter(Progress::is_terminal) {
            debug!(progress = %progress, "Already reconciled");
            return ReconcileOutcome::Complete;
        }

        if self.pollers.is_active(key).await {
            debug!("Completion poll already in flight");
            return ReconcileOutcome::Submitted;
        }

        if let Err(e) = self.policy.validate(&resource) {
            error!(error = %e, "Invalid spec, dropping key");
            self.mark_failed(key, &e).await;
            return ReconcileOutcome::Dropped;
        }

        let submitted = self
            .policy
            .submit(self.dependents.as_ref(), &resource)
            .await;
        let (dependent, outcome) = match submitted {
            Ok(submitted) => submitted,
            Err(e) if e.is_terminal() => {
                metrics::DEPENDENT_CREATES
                    .with_label_values(&[P::KIND, "conflict"])
                    .inc();
                error!(error = %e, "Cannot create {}, dropping key", P::DEPENDENT_KIND);
                self.mark_failed(key, &e).await;
                return ReconcileOutcome::Dropped;
            }
            Err(e) => {
                metrics::DEPENDENT_CREATES
                    .with_label_values(&[P::KIND, "error"])
                    .inc();
                warn!(error = %e, "Failed to create {}, will retry", P::DEPENDENT_KIND);
                return ReconcileOutcome::Retry;
            }
        };

        match outcome {
            CreateOutcome::Created => {
                metrics::DEPENDENT_CREATES
                    .with_label_values(&[P::KIND, "created"])
                    .inc();
                info!(dependent = %dependent, "Created {}", P::DEPENDENT_KIND);
            }
            CreateOutcome::AlreadyExists => {
                metrics::DEPENDENT_CREATES
                    .with_label_values(&[P::KIND, "exists"])
                    .inc();
                info!(dependent = %dependent, "{} already exists", P::DEPENDENT_KIND);
            }
        }

        match self.status.set_progress(key, Progress::Creating, None).await {
            Ok(_) => {}
            Err(e @ Error::NotFound { .. }) => {
                info!(error = %e, "Resource deleted after submission, dropping key");
                return ReconcileOutcome::Dropped;
            }
            // The poller's Created write supersedes a missing Creating.
            Err(e) => warn!(error = %e, "Failed to record Creating progress"),
        }

        self.start_poller(key.clone(), dependent).await;
        ReconcileOutcome::Submitted
    }

    async fn mark_failed(&self, key: &ObjectKey, cause: &Error) {
        if let Err(e) = self
            .status
            .set_progress(key, Progress::Failed, Some(cause.to_string()))
            .await
        {
            error!(kind = P::KIND, key = %key, error = %e, "Failed to record Failed progress");
        }
    }

    async fn start_poller(self: &Arc<Self>, key: ObjectKey, dependent: ObjectKey) {
        let controller = Arc::clone(self);
        let poll_key = key.clone();
        let started = self
            .pollers
            .spawn(key, move |cancel| async move {
                controller
                    .await_completion(&poll_key, &dependent, &cancel)
                    .await;
            })
            .await;

        if started {
            debug!(kind = P::KIND, "Started completion poller");
        }
    }

    async fn await_completion(
        &self,
        key: &ObjectKey,
        dependent: &ObjectKey,
        cancel: &CancellationToken,
    ) {
        let result = poll_until_ready(&self.poll, cancel, || {
            self.policy.is_ready(self.dependents.as_ref(), dependent)
        })
        .await;

        metrics::POLL_OUTCOMES
            .with_label_values(&[P::KIND, result.as_str()])
            .inc();

        match result {
            PollResult::Ready => {
                info!(kind = P::KIND, key = %key, dependent = %dependent, "{} is ready", P::DEPENDENT_KIND);
                if let Err(e) = self.status.set_progress(key, Progress::Created, None).await {
                    error!(kind = P::KIND, key = %key, error = %e, "Failed to record Created progress");
                }
            }
            PollResult::TimedOut => {
                let message = format!(
                    "{} {} did not become ready within {}s",
                    P::DEPENDENT_KIND,
                    dependent,
                    self.poll.timeout.as_secs()
                );
                error!(kind = P::KIND, key = %key, "{}", message);
                if let Err(e) = self
                    .status
                    .set_progress(key, Progress::Failed, Some(message))
                    .await
                {
                    error!(kind = P::KIND, key = %key, error = %e, "Failed to record Failed progress");
                }
            }
            PollResult::Cancelled => {
                info!(kind = P::KIND, key = %key, "Completion poll cancelled, progress left at Creating");
            }
        }
    }

    /// Pull the next key and reconcile it.
    ///
    /// Returns `false` once the queue is shut down and drained.
    pub async fn process_next(self: &Arc<Self>) -> bool {
        match self.queue.dequeue().await {
            Some(key) => {
                self.process(key).await;
                true
            }
            None => false,
        }
    }

    async fn process(self: &Arc<Self>, key: ObjectKey) {
        match self.reconcile(&key).await {
            ReconcileOutcome::Retry => {
                let delay = self.queue.retry(key.clone()).await;
                debug!(kind = P::KIND, key = %key, delay_ms = delay.as_millis() as u64, "Scheduled retry");
            }
            _ => self.queue.forget(&key).await,
        }
        self.queue.mark_done(&key).await;
    }

    /// Worker loop: reconcile keys until `shutdown` is cancelled, then stop
    /// the queue and cancel every in-flight poller.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(kind = P::KIND, queue = self.queue.name(), "Starting worker");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                key = self.queue.dequeue() => key,
            };
            let Some(key) = next else { break };
            self.process(key).await;
        }

        self.shutdown().await;
    }

    /// Stop accepting work and wait for every poller to exit
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.pollers.shutdown().await;
        info!(kind = P::KIND, "Worker stopped");
    }
}
