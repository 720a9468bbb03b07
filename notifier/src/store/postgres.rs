//! PostgreSQL store backed by an `sqlx` connection pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{abbrev_id, Result, Store, StoreError};
use crate::models::{ApiKey, NewWebhookDelivery, Rental, RentalStatus, WebhookConfig, WebhookDelivery};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Rental row as stored; status is kept as text.
#[derive(Debug, FromRow)]
struct RentalRow {
    id: String,
    user_id: String,
    phone_number: String,
    provider_ref: Option<String>,
    status: String,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RentalRow> for Rental {
    type Error = StoreError;

    fn try_from(row: RentalRow) -> Result<Self> {
        let status = row
            .status
            .parse::<RentalStatus>()
            .map_err(|_| StoreError::InvalidValue {
                column: "rentals.status",
                value: row.status.clone(),
            })?;

        Ok(Rental {
            id: row.id,
            user_id: row.user_id,
            phone_number: row.phone_number,
            provider_ref: row.provider_ref,
            status,
            expires_at: row.expires_at,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        info!(max_connections = max_connections, "database_pool_created");

        Ok(Self { pool })
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database_migrations_applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self), fields(user_id = %abbrev_id(user_id)), err)]
    async fn webhook_config(&self, user_id: &str) -> Result<Option<WebhookConfig>> {
        let config = sqlx::query_as::<_, WebhookConfig>(
            "SELECT webhook_url, webhook_secret FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    #[instrument(skip(self, delivery), fields(user_id = %abbrev_id(&delivery.user_id), event = %delivery.event), err)]
    async fn insert_delivery(&self, delivery: NewWebhookDelivery) -> Result<WebhookDelivery> {
        let record = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries
                (id, user_id, event, url, payload_id, status_code, attempt, failed, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, event, url, payload_id, status_code, attempt, failed,
                      delivered_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&delivery.user_id)
        .bind(&delivery.event)
        .bind(&delivery.url)
        .bind(delivery.payload_id)
        .bind(delivery.status_code)
        .bind(delivery.attempt)
        .bind(delivery.failed)
        .bind(delivery.delivered_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_id(user_id)), err)]
    async fn list_deliveries(&self, user_id: &str, limit: i64) -> Result<Vec<WebhookDelivery>> {
        let records = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT id, user_id, event, url, payload_id, status_code, attempt, failed,
                   delivered_at, created_at
            FROM webhook_deliveries
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[instrument(skip(self), err)]
    async fn due_rentals(&self, now: DateTime<Utc>) -> Result<Vec<Rental>> {
        let rows = sqlx::query_as::<_, RentalRow>(
            r#"
            SELECT id, user_id, phone_number, provider_ref, status, expires_at
            FROM rentals
            WHERE status = 'ACTIVE' AND expires_at <= $1
            ORDER BY expires_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Rental::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn expire_rental(&self, rental_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE rentals
            SET status = 'EXPIRED', updated_at = now()
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(rental_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, name, key_prefix, key_hash, active, last_used_at
            FROM api_keys
            WHERE key_prefix = $1 AND active
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    #[instrument(skip(self), err)]
    async fn touch_api_key(&self, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(key_id)
            .bind(used_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("database_pool_closed");
    }
}
