//! NexaLine Sweeper - background rental expiry worker.
//!
//! Runs the rental expiry sweep every `SWEEP_INTERVAL_SECS`, releasing the
//! numbers of expired rentals and notifying their owners by webhook.
//! The same sweep is reachable on demand through the web server's cron route.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{signal, time::MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nexaline::{open_store, Config, Dispatcher, LoggingProvider, RetryPolicy, Sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("sweeper_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        memory_store = config.uses_memory_store(),
        sweep_interval_secs = config.sweep_interval_secs,
        webhook_max_attempts = config.webhook_max_attempts,
        webhook_timeout_ms = config.webhook_timeout_ms,
        "config_loaded"
    );

    let store = open_store(&config)
        .await
        .context("Failed to open store")?;

    let dispatcher = Dispatcher::new(store.clone(), RetryPolicy::from_config(&config))
        .context("Failed to create HTTP client")?;
    let sweeper = Sweeper::new(store.clone(), Arc::new(LoggingProvider)).with_notifier(dispatcher);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(config.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("sweeper_ready");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("sweeper_stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweeper.run().await {
                    error!(error = %e, "rental_sweep_failed");
                }
            }
        }
    }

    // Let in-flight expiry notifications write their records
    sweeper.drain().await;
    store.close().await;

    info!("sweeper_shutdown_complete");

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
}
