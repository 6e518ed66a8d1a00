//! Energi Gateway - gas pricing, transaction polling and cancellation
//!
//! Serves per-network connectors for Energi EVM networks over HTTP and
//! exposes Prometheus metrics.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use energi_gateway::api;
use energi_gateway::config::Settings;
use energi_gateway::connector::ConnectorRegistry;
use energi_gateway::metrics::MetricsServer;
use energi_gateway::wallet::WalletStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Energi Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Arc::new(Settings::load()?);
    info!(
        "Loaded configuration for {} network(s)",
        settings.chain.networks.len()
    );

    let wallets = Arc::new(WalletStore::from_env(&settings.wallet.private_keys_env)?);
    info!("{} wallet(s) available for cancellation", wallets.len());

    // Connectors are created lazily on first request per network
    let registry = Arc::new(ConnectorRegistry::new(settings.clone(), wallets));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let registry = registry.clone();
        async move {
            if let Err(e) = api::run_server(config, registry).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Energi Gateway is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop refresh and metrics loops of every live connector
    registry.close_all();

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Energi Gateway stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,energi_gateway=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
