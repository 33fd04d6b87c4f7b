//! Filemanager entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use barge_broker::AmqpBroker;
use barge_filemanager::{FileManagerConfig, run};
use barge_storage::LocalStorage;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting barge filemanager"
    );

    let config = FileManagerConfig::from_env();

    let storage = match LocalStorage::new(&config.storage_path).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(path = %config.storage_path, error = %e, "failed to open storage directory");
            std::process::exit(1);
        }
    };
    info!(path = %config.storage_path, "storage ready");

    let broker = match AmqpBroker::connect_with_retry(config.broker, 5).await {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, "failed to connect to broker");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    broker.spawn_heartbeat(cancel.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        });
    }

    if let Err(e) = run(broker, storage, cancel).await {
        error!(error = %e, "filemanager exited with error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
