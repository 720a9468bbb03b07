//! Rental expiry sweep.
//!
//! Each pass:
//! 1. Loads ACTIVE rentals whose `expires_at` has passed
//! 2. Flips each one to EXPIRED with a conditional update
//! 3. For the rentals this pass actually flipped, asks the provider to
//!    release the number and notifies the owner with `rental.expired`
//!
//! A rental another sweep already flipped is skipped, so a number is never
//! released twice even when sweeps overlap.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::models::Rental;
use crate::rentals::provider::NumberProvider;
use crate::store::{abbrev_id, Result, Store};
use crate::webhook::{Dispatcher, EVENT_RENTAL_EXPIRED};

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Due rentals found
    pub scanned: usize,
    /// Rentals this pass moved to EXPIRED
    pub expired: usize,
    /// Rentals no longer active by the time this pass reached them
    pub already_handled: usize,
    /// Provider releases that failed after the transition
    pub release_failures: usize,
    /// Rentals whose transition failed in the store
    pub errors: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn Store>,
    provider: Arc<dyn NumberProvider>,
    notifier: Option<Dispatcher>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn NumberProvider>) -> Self {
        Self {
            store,
            provider,
            notifier: None,
        }
    }

    /// Send `rental.expired` webhooks through `dispatcher`.
    pub fn with_notifier(mut self, dispatcher: Dispatcher) -> Self {
        self.notifier = Some(dispatcher);
        self
    }

    /// Wait for expiry notifications still being delivered.
    pub async fn drain(&self) {
        if let Some(dispatcher) = &self.notifier {
            dispatcher.drain().await;
        }
    }

    /// Sweep against the current time.
    pub async fn run(&self) -> Result<SweepReport> {
        self.run_once(Utc::now()).await
    }

    /// Expire every rental due at `now`.
    ///
    /// Only the initial query can fail the pass; per-rental failures are
    /// logged and counted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.store.due_rentals(now).await?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..Default::default()
        };

        info!(due_rentals = due.len(), "rental_sweep_start");

        for rental in &due {
            match self.store.expire_rental(&rental.id).await {
                Ok(true) => {
                    report.expired += 1;
                    info!(
                        rental_id = %rental.id,
                        user_id = %abbrev_id(&rental.user_id),
                        expires_at = %rental.expires_at,
                        "rental_expired"
                    );
                }
                Ok(false) => {
                    report.already_handled += 1;
                    info!(rental_id = %rental.id, "rental_already_handled");
                    continue;
                }
                Err(e) => {
                    report.errors += 1;
                    error!(rental_id = %rental.id, error = %e, "rental_expire_failed");
                    continue;
                }
            }

            if let Err(e) = self.provider.release_number(rental).await {
                report.release_failures += 1;
                warn!(
                    rental_id = %rental.id,
                    phone_number = %rental.phone_number,
                    error = %e,
                    "provider_release_failed"
                );
            }

            self.notify_owner(rental, now);
        }

        info!(
            scanned = report.scanned,
            expired = report.expired,
            already_handled = report.already_handled,
            release_failures = report.release_failures,
            errors = report.errors,
            "rental_sweep_complete"
        );

        Ok(report)
    }

    fn notify_owner(&self, rental: &Rental, now: DateTime<Utc>) {
        let Some(dispatcher) = &self.notifier else {
            return;
        };

        dispatcher.dispatch(
            rental.user_id.clone(),
            EVENT_RENTAL_EXPIRED,
            json!({
                "rentalId": rental.id,
                "phoneNumber": rental.phone_number,
                "expiresAt": rental.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                "expiredAt": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiKey, NewWebhookDelivery, RentalStatus, WebhookConfig, WebhookDelivery};
    use crate::rentals::provider::{LoggingProvider, ProviderError};
    use crate::store::MemoryStore;
    use crate::webhook::RetryPolicy;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Provider that remembers which rentals it released.
    #[derive(Default)]
    struct RecordingProvider {
        released: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NumberProvider for RecordingProvider {
        async fn release_number(&self, rental: &Rental) -> Result<(), ProviderError> {
            self.released.lock().unwrap().push(rental.id.clone());
            if self.fail {
                return Err(ProviderError::Transport("connection reset".to_string()));
            }
            Ok(())
        }
    }

    /// Store that keeps answering `due_rentals` with the snapshot taken when
    /// it was built, like a sweep that read the rentals before another one
    /// expired them.
    struct StaleStore {
        inner: MemoryStore,
        snapshot: Vec<Rental>,
    }

    impl StaleStore {
        async fn new(inner: MemoryStore, now: DateTime<Utc>) -> Self {
            let snapshot = inner.due_rentals(now).await.unwrap();
            Self { inner, snapshot }
        }
    }

    #[async_trait]
    impl Store for StaleStore {
        async fn webhook_config(&self, user_id: &str) -> Result<Option<WebhookConfig>> {
            self.inner.webhook_config(user_id).await
        }

        async fn insert_delivery(&self, delivery: NewWebhookDelivery) -> Result<WebhookDelivery> {
            self.inner.insert_delivery(delivery).await
        }

        async fn list_deliveries(&self, user_id: &str, limit: i64) -> Result<Vec<WebhookDelivery>> {
            self.inner.list_deliveries(user_id, limit).await
        }

        async fn due_rentals(&self, _now: DateTime<Utc>) -> Result<Vec<Rental>> {
            Ok(self.snapshot.clone())
        }

        async fn expire_rental(&self, rental_id: &str) -> Result<bool> {
            self.inner.expire_rental(rental_id).await
        }

        async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
            self.inner.api_keys_by_prefix(prefix).await
        }

        async fn touch_api_key(&self, key_id: uuid::Uuid, used_at: DateTime<Utc>) -> Result<()> {
            self.inner.touch_api_key(key_id, used_at).await
        }
    }

    fn rental(id: &str, status: RentalStatus, expires_at: DateTime<Utc>) -> Rental {
        Rental {
            id: id.to_string(),
            user_id: "user_rentals".to_string(),
            phone_number: "+15550100".to_string(),
            provider_ref: Some(format!("PN{}", id)),
            status,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_expires_only_past_due_active_rentals() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.put_rental(rental("past", RentalStatus::Active, now - Duration::hours(1))).await;
        store.put_rental(rental("future", RentalStatus::Active, now + Duration::hours(1))).await;
        store.put_rental(rental("cancelled", RentalStatus::Cancelled, now - Duration::hours(1))).await;

        let provider = Arc::new(RecordingProvider::default());
        let sweeper = Sweeper::new(Arc::new(store.clone()), provider.clone());

        let report = sweeper.run_once(now).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(store.rental("past").await.unwrap().status, RentalStatus::Expired);
        assert_eq!(store.rental("future").await.unwrap().status, RentalStatus::Active);
        assert_eq!(store.rental("cancelled").await.unwrap().status, RentalStatus::Cancelled);
        assert_eq!(*provider.released.lock().unwrap(), vec!["past".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_release_once() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.put_rental(rental("r1", RentalStatus::Active, now - Duration::minutes(5))).await;

        let provider = Arc::new(RecordingProvider::default());
        let sweeper = Sweeper::new(Arc::new(store.clone()), provider.clone());

        let first = sweeper.run_once(now).await.unwrap();
        assert_eq!(first.expired, 1);

        let second = sweeper.run_once(now).await.unwrap();
        assert_eq!(second, SweepReport::default());
        assert_eq!(provider.released.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_with_same_snapshot_release_once() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.put_rental(rental("r1", RentalStatus::Active, now - Duration::minutes(5))).await;

        // Both sweeps read r1 as due before either one expires it
        let stale: Arc<dyn Store> = Arc::new(StaleStore::new(store.clone(), now).await);
        let provider = Arc::new(RecordingProvider::default());
        let first = Sweeper::new(stale.clone(), provider.clone());
        let second = Sweeper::new(stale, provider.clone());

        let (a, b) = tokio::join!(first.run_once(now), second.run_once(now));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.scanned, 1);
        assert_eq!(b.scanned, 1);
        assert_eq!(a.expired + b.expired, 1);
        assert_eq!(a.already_handled + b.already_handled, 1);
        assert_eq!(*provider.released.lock().unwrap(), vec!["r1".to_string()]);
        assert_eq!(store.rental("r1").await.unwrap().status, RentalStatus::Expired);
    }

    #[tokio::test]
    async fn test_release_failure_keeps_rental_expired() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.put_rental(rental("r1", RentalStatus::Active, now - Duration::minutes(5))).await;

        let provider = Arc::new(RecordingProvider {
            fail: true,
            ..Default::default()
        });
        let sweeper = Sweeper::new(Arc::new(store.clone()), provider);

        let report = sweeper.run_once(now).await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.release_failures, 1);
        assert_eq!(store.rental("r1").await.unwrap().status, RentalStatus::Expired);
    }

    #[tokio::test]
    async fn test_expiry_notifies_owner() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-nexaline-event", "rental.expired"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let now = Utc::now();
        let store = MemoryStore::new();
        store
            .put_user(
                "user_rentals",
                WebhookConfig {
                    webhook_url: Some(mock_server.uri()),
                    webhook_secret: None,
                },
            )
            .await;
        store.put_rental(rental("r1", RentalStatus::Active, now - Duration::minutes(5))).await;

        let store_handle: Arc<dyn Store> = Arc::new(store.clone());
        let dispatcher =
            Dispatcher::new(store_handle.clone(), RetryPolicy::immediate(1, std::time::Duration::from_secs(2)))
                .unwrap();
        let sweeper = Sweeper::new(store_handle, Arc::new(LoggingProvider)).with_notifier(dispatcher);

        sweeper.run_once(now).await.unwrap();
        sweeper.drain().await;

        let deliveries = store.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event, "rental.expired");
        assert!(!deliveries[0].failed);

        let requests = mock_server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["data"]["rentalId"], "r1");
    }
}
