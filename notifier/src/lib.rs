//! NexaLine notifier - webhook delivery and rental expiry.
//!
//! This library provides shared modules for the two NexaLine binaries:
//! - `nexaline-web`: Thin web server for test webhooks, delivery logs and the cron sweep
//! - `nexaline-sweeper`: Background worker running the rental expiry sweep on an interval
//!
//! ## Architecture
//!
//! ```text
//! event → Dispatcher → sign → POST (≤3 attempts) → webhook_deliveries
//!                                    ↑
//! Sweeper → expire ACTIVE rentals → release number → rental.expired
//! ```

pub mod api_keys;
pub mod config;
pub mod models;
pub mod rentals;
pub mod store;
pub mod web;
pub mod webhook;

use std::sync::Arc;

use tracing::info;

// Re-export commonly used types
pub use config::Config;
pub use rentals::{LoggingProvider, NumberProvider, SweepReport, Sweeper};
pub use store::{MemoryStore, PgStore, Store, StoreError};
pub use web::AppState;
pub use webhook::{DeliveryResult, Dispatcher, RetryPolicy, WebhookPayload};

/// Open the store selected by `DATABASE_URL`.
///
/// `memory` gives an empty in-process store; anything else is treated as a
/// PostgreSQL URL and migrated before use.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>, StoreError> {
    if config.uses_memory_store() {
        info!("memory_store_selected");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store() {
        let mut config = Config::from_env();
        config.database_url = config::MEMORY_DATABASE_URL.to_string();

        let store = open_store(&config).await.unwrap();

        assert!(store.webhook_config("nobody").await.unwrap().is_none());
        assert!(store.list_deliveries("nobody", 10).await.unwrap().is_empty());
    }
}
