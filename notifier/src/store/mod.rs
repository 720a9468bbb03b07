//! Persistence boundary.
//!
//! All state lives in the relational store; the dispatcher, sweeper and web
//! handlers only talk to it through the [`Store`] trait.
//!
//! - [`postgres`]: production store backed by `sqlx` and PostgreSQL
//! - [`memory`]: in-process store for tests and local runs

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ApiKey, NewWebhookDelivery, Rental, WebhookConfig, WebhookDelivery};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Webhook settings of a user, `None` when the user does not exist.
    async fn webhook_config(&self, user_id: &str) -> Result<Option<WebhookConfig>>;

    /// Append one delivery record.
    async fn insert_delivery(&self, delivery: NewWebhookDelivery) -> Result<WebhookDelivery>;

    /// Most recent delivery records of a user, newest first.
    async fn list_deliveries(&self, user_id: &str, limit: i64) -> Result<Vec<WebhookDelivery>>;

    /// Active rentals whose expiry is at or before `now`.
    async fn due_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>>;

    /// Move a rental from ACTIVE to EXPIRED.
    ///
    /// Returns `false` when the rental was no longer active, so only one
    /// caller ever wins the transition.
    async fn expire_rental(&self, rental_id: &str) -> Result<bool>;

    /// Active API keys sharing the given prefix.
    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>>;

    /// Record that a key was used.
    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()>;

    /// Release pooled resources on shutdown.
    async fn close(&self) {}
}

/// Shortened identifier for log fields.
pub fn abbrev_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_id() {
        assert_eq!(abbrev_id("cl9x2user000001"), "cl9x2use");
        assert_eq!(abbrev_id("short"), "short");
    }
}
