//! Kubernetes controllers for Backup and Restore
//!
//! This module contains the reconciliation engine and the watch adapter that
//! feeds it, plus the per-kind entry points used by the binary.

mod engine;
pub mod watch;

pub use engine::{Controller, ReconcileOutcome};

use std::sync::Arc;

use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::{KubeDependentClient, KubeResourceStore};
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::reconcilers::{BackupPolicy, KindPolicy, RestorePolicy};

/// Run the Backup controller until `shutdown` is cancelled
pub async fn run_backup_controller(
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    run_controller(BackupPolicy, client, config, shutdown).await
}

/// Run the Restore controller until `shutdown` is cancelled
pub async fn run_restore_controller(
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    run_controller(RestorePolicy, client, config, shutdown).await
}

/// Watch all namespaces for `P::Resource` and run one worker over them.
///
/// Returns after the worker has stopped and every completion poller has
/// been cancelled. If the watch ends on its own the worker is stopped too.
pub async fn run_controller<P: KindPolicy>(
    policy: P,
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let api: Api<P::Resource> = Api::all(client.clone());
    watch::ensure_installed::<P>(&api).await?;

    info!(kind = P::KIND, queue = %config.queue_name, "Starting controller");

    let controller = Controller::new(
        policy,
        &config,
        Arc::new(KubeResourceStore::<P::Resource>::new(client.clone())),
        Arc::new(KubeDependentClient::new(client)),
    );

    let stop = shutdown.child_token();
    let worker = tokio::spawn(Arc::clone(&controller).run(stop.clone()));

    watch::watch(api, controller, stop.clone()).await;
    stop.cancel();

    if let Err(e) = worker.await {
        error!(kind = P::KIND, error = %e, "Worker task panicked");
    }
    Ok(())
}
