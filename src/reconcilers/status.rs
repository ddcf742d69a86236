//! Status updater
//!
//! Read-modify-write of `status.progress`, guarded by the resource version
//! and by the forward-only progress ordering.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::ResourceStore;
use crate::crd::{can_advance, Progress, ProgressResource};
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::ObjectKey;

/// What a [`StatusUpdater::set_progress`] call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWrite {
    /// The new progress was written
    Applied,
    /// Progress already had the requested value
    Unchanged,
    /// The write would have moved progress backwards and was skipped
    Refused { current: Progress },
}

pub struct StatusUpdater<K> {
    kind: &'static str,
    store: Arc<dyn ResourceStore<K>>,
}

impl<K: ProgressResource> StatusUpdater<K> {
    pub fn new(kind: &'static str, store: Arc<dyn ResourceStore<K>>) -> Self {
        Self { kind, store }
    }

    /// Move progress forward to `progress`.
    ///
    /// A version conflict re-reads the object and retries once; any other
    /// error is returned to the caller.
    pub async fn set_progress(
        &self,
        key: &ObjectKey,
        progress: Progress,
        message: Option<String>,
    ) -> Result<StatusWrite> {
        let mut retried = false;

        loop {
            let Some(mut resource) = self.store.get(key).await? else {
                return Err(Error::NotFound {
                    kind: self.kind.to_string(),
                    key: key.to_string(),
                });
            };

            let current = resource.progress();
            if current == Some(progress) {
                debug!(kind = self.kind, key = %key, progress = %progress, "Progress unchanged");
                return Ok(StatusWrite::Unchanged);
            }
            if let Some(current) = current.filter(|c| !can_advance(Some(*c), progress)) {
                warn!(
                    kind = self.kind,
                    key = %key,
                    current = %current,
                    requested = %progress,
                    "Refusing to move progress backwards"
                );
                return Ok(StatusWrite::Refused { current });
            }

            resource.set_progress(progress, message.clone());
            match self.store.replace_status(key, &resource).await {
                Ok(_) => {
                    info!(kind = self.kind, key = %key, progress = %progress, "Updated status");
                    metrics::STATUS_TRANSITIONS
                        .with_label_values(&[self.kind, progress.as_str()])
                        .inc();
                    return Ok(StatusWrite::Applied);
                }
                Err(Error::Conflict(_)) if !retried => {
                    debug!(kind = self.kind, key = %key, "Status write conflicted, retrying once");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
