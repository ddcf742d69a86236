//! Watch adapter
//!
//! Feeds add/update notifications for a resource kind into a controller's
//! `on_add`. The initial list after (re)start replays every existing
//! object, which is how unfinished work is picked up again.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Controller;
use crate::error::Result;
use crate::reconcilers::KindPolicy;

/// Fail early when the CRD for `api` is not installed
pub async fn ensure_installed<P: KindPolicy>(api: &Api<P::Resource>) -> Result<()> {
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(kind = P::KIND, error = %e, "CRD not installed");
        return Err(e.into());
    }
    Ok(())
}

/// Forward watch events to `controller` until `shutdown` is cancelled
pub async fn watch<P: KindPolicy>(
    api: Api<P::Resource>,
    controller: Arc<Controller<P>>,
    shutdown: CancellationToken,
) {
    info!(kind = P::KIND, "Starting watch");

    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .boxed();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.try_next() => match event {
                Ok(Some(resource)) => controller.on_add(&resource).await,
                Ok(None) => {
                    warn!(kind = P::KIND, "Watch stream ended");
                    break;
                }
                Err(e) => warn!(kind = P::KIND, error = %e, "Watch stream error"),
            }
        }
    }

    info!(kind = P::KIND, "Watch stopped");
}
