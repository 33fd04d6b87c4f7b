//! Gateway entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use barge_broker::AmqpBroker;
use barge_gateway::api::{self, AppState};
use barge_gateway::{FileClient, GatewayConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting barge gateway");

    let config = GatewayConfig::from_env();

    let broker = match AmqpBroker::connect_with_retry(config.broker.clone(), 5).await {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, "failed to connect to broker");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    broker.spawn_heartbeat(cancel.clone());

    let client = FileClient::new(Arc::clone(&broker));
    if let Err(e) = client.setup().await {
        error!(error = %e, "failed to declare exchanges");
        std::process::exit(1);
    }

    let state = Arc::new(AppState { client });
    let app = api::router(state, &config.cors_origin);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!(%addr, "gateway listening");

    let shutdown_cancel = cancel.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    if let Err(e) = serve.await {
        error!(error = %e, "server error");
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
