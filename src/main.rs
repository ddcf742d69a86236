//! Backstore Kubernetes Operator
//!
//! Process wiring: tracing, configuration, the Kubernetes client, the
//! metrics server and one controller per resource kind.

use kube::Client;
use tokio::signal;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backstore_operator::{config::OperatorConfig, controllers, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = OperatorConfig::from_env()?;
    info!(
        backup_queue = %config.backup.queue_name,
        restore_queue = %config.restore.queue_name,
        metrics_port = config.metrics_port,
        "Starting Backstore Operator"
    );

    let client = Client::try_default().await?;
    let metrics_server = tokio::spawn(metrics::serve(config.metrics_port));

    let shutdown = CancellationToken::new();
    let mut backups = tokio::spawn(controllers::run_backup_controller(
        client.clone(),
        config.backup,
        shutdown.clone(),
    ));
    let mut restores = tokio::spawn(controllers::run_restore_controller(
        client,
        config.restore,
        shutdown.clone(),
    ));

    tokio::select! {
        result = &mut backups => report_exit("Backup", result),
        result = &mut restores => report_exit("Restore", result),
        result = metrics_server => error!(?result, "Metrics server exited"),
        _ = shutdown_signal() => info!("Shutdown requested"),
    }

    metrics::OPERATOR_HEALTH.set(0.0);
    shutdown.cancel();

    // Each controller returns once its worker and pollers have stopped
    for handle in [backups, restores] {
        if !handle.is_finished() {
            if let Err(e) = handle.await {
                error!(error = %e, "Controller task panicked during shutdown");
            }
        }
    }

    info!("Backstore Operator stopped");
    Ok(())
}

fn report_exit(kind: &str, result: Result<backstore_operator::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => warn!(kind, "Controller stopped"),
        Ok(Err(e)) => error!(kind, error = %e, "Controller failed"),
        Err(e) => error!(kind, error = %e, "Controller task panicked"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Resolve on SIGINT or, on unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, relying on SIGINT only");
                wait_for_interrupt().await;
                return;
            }
        };
        tokio::select! {
            _ = wait_for_interrupt() => {}
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    wait_for_interrupt().await;
}

async fn wait_for_interrupt() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await
        }
    }
}
