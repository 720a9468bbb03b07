//! In-process store.
//!
//! Keeps every table in a map behind a `tokio::sync::RwLock`. Used by the
//! test suite and by local runs with `DATABASE_URL=memory`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Result, Store};
use crate::models::{
    ApiKey, NewWebhookDelivery, Rental, RentalStatus, UserId, WebhookConfig, WebhookDelivery,
};

/// Cloneable handle to a shared in-memory dataset.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: RwLock<HashMap<UserId, WebhookConfig>>,
    deliveries: RwLock<Vec<WebhookDelivery>>,
    rentals: RwLock<HashMap<String, Rental>>,
    api_keys: RwLock<HashMap<Uuid, ApiKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a user's webhook settings.
    pub async fn put_user(&self, user_id: &str, config: WebhookConfig) {
        self.inner
            .users
            .write()
            .await
            .insert(user_id.to_string(), config);
    }

    pub async fn put_rental(&self, rental: Rental) {
        self.inner
            .rentals
            .write()
            .await
            .insert(rental.id.clone(), rental);
    }

    pub async fn put_api_key(&self, key: ApiKey) {
        self.inner.api_keys.write().await.insert(key.id, key);
    }

    pub async fn rental(&self, rental_id: &str) -> Option<Rental> {
        self.inner.rentals.read().await.get(rental_id).cloned()
    }

    pub async fn api_key(&self, key_id: Uuid) -> Option<ApiKey> {
        self.inner.api_keys.read().await.get(&key_id).cloned()
    }

    /// Every delivery record in insertion order.
    pub async fn deliveries(&self) -> Vec<WebhookDelivery> {
        self.inner.deliveries.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn webhook_config(&self, user_id: &str) -> Result<Option<WebhookConfig>> {
        Ok(self.inner.users.read().await.get(user_id).cloned())
    }

    async fn insert_delivery(&self, delivery: NewWebhookDelivery) -> Result<WebhookDelivery> {
        let record = delivery.into_record(Uuid::new_v4(), Utc::now());
        self.inner.deliveries.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_deliveries(&self, user_id: &str, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let deliveries = self.inner.deliveries.read().await;

        Ok(deliveries
            .iter()
            .rev()
            .filter(|d| d.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn due_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>> {
        let rentals = self.inner.rentals.read().await;
        let mut due: Vec<Rental> = rentals
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(due)
    }

    async fn expire_rental(&self, rental_id: &str) -> Result<bool> {
        let mut rentals = self.inner.rentals.write().await;
        match rentals.get_mut(rental_id) {
            Some(rental) if rental.status == RentalStatus::Active => {
                rental.status = RentalStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        Ok(self
            .inner
            .api_keys
            .read()
            .await
            .values()
            .filter(|k| k.active && k.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.inner.api_keys.write().await.get_mut(&key_id) {
            key.last_used_at = Some(used_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delivery(user_id: &str, event: &str) -> NewWebhookDelivery {
        NewWebhookDelivery {
            user_id: user_id.to_string(),
            event: event.to_string(),
            url: "https://hooks.example.com".to_string(),
            payload_id: Uuid::new_v4(),
            status_code: 200,
            attempt: 1,
            failed: false,
            delivered_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_list_deliveries_newest_first() {
        let store = MemoryStore::new();
        store.insert_delivery(delivery("user_a", "sms.received")).await.unwrap();
        store.insert_delivery(delivery("user_b", "sms.received")).await.unwrap();
        store.insert_delivery(delivery("user_a", "call.completed")).await.unwrap();

        let listed = store.list_deliveries("user_a", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].event, "call.completed");
        assert_eq!(listed[1].event, "sms.received");

        let limited = store.list_deliveries("user_a", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_expire_rental_only_once() {
        let store = MemoryStore::new();
        store
            .put_rental(Rental {
                id: "rent_1".to_string(),
                user_id: "user_a".to_string(),
                phone_number: "+15550100".to_string(),
                provider_ref: None,
                status: RentalStatus::Active,
                expires_at: Utc::now() - Duration::hours(1),
            })
            .await;

        assert!(store.expire_rental("rent_1").await.unwrap());
        assert!(!store.expire_rental("rent_1").await.unwrap());
        assert!(!store.expire_rental("missing").await.unwrap());
        assert_eq!(
            store.rental("rent_1").await.unwrap().status,
            RentalStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_config() {
        let store = MemoryStore::new();
        assert_eq!(store.webhook_config("nobody").await.unwrap(), None);
    }
}
