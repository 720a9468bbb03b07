//! NexaLine Web Server - webhook and cron endpoints.
//!
//! This binary provides a thin web server that:
//! - Sends signed test webhooks to an API key holder's endpoint
//! - Lists the caller's webhook delivery log
//! - Runs the rental expiry sweep when the scheduler calls the cron route

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nexaline::web::router;
use nexaline::{open_store, AppState, Config, Dispatcher, LoggingProvider, RetryPolicy, Sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        memory_store = config.uses_memory_store(),
        cron_secret_configured = config.cron_secret.is_some(),
        webhook_max_attempts = config.webhook_max_attempts,
        "config_loaded"
    );

    let store = open_store(&config)
        .await
        .context("Failed to open store")?;

    let dispatcher = Dispatcher::new(store.clone(), RetryPolicy::from_config(&config))
        .context("Failed to create HTTP client")?;
    let sweeper =
        Sweeper::new(store.clone(), Arc::new(LoggingProvider)).with_notifier(dispatcher.clone());
    let pending_deliveries = dispatcher.clone();

    // Create application state
    let port = config.port;
    let state = AppState::new(config, store.clone(), dispatcher, sweeper);
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let in-flight webhook deliveries write their records
    pending_deliveries.drain().await;
    store.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
