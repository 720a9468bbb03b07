//! HTTP endpoint handlers.
//!
//! Webhook handlers authenticate with an API key; the cron handler with the
//! shared cron secret. All store access goes through [`AppState::store`].

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::models::WebhookDelivery;
use crate::rentals::{SweepReport, Sweeper};
use crate::store::{abbrev_id, Store};
use crate::web::auth::{authenticate, authorize_cron, ApiError};
use crate::webhook::{DeliveryResult, Dispatcher, EVENT_WEBHOOK_TEST};
use crate::Config;

const DEFAULT_DELIVERY_LIMIT: i64 = 20;
const MAX_DELIVERY_LIMIT: i64 = 100;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub dispatcher: Dispatcher,
    pub sweeper: Sweeper,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, dispatcher: Dispatcher, sweeper: Sweeper) -> Self {
        Self {
            config: Arc::new(config),
            store,
            dispatcher,
            sweeper,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Webhooks
// =============================================================================

/// Optional body of the test webhook request.
#[derive(Debug, Default, Deserialize)]
pub struct TestWebhookRequest {
    #[serde(default)]
    pub message: Option<String>,
}

impl TestWebhookRequest {
    /// Parse an optional JSON body; an empty body means no overrides.
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
    }
}

/// Send a `webhook.test` event to the caller's endpoint and report the outcome.
pub async fn test_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliveryResult>, ApiError> {
    let key = authenticate(state.store.as_ref(), &headers).await?;
    let request = TestWebhookRequest::from_body(&body)?;

    info!(user_id = %abbrev_id(&key.user_id), "webhook_test_requested");

    let message = request
        .message
        .unwrap_or_else(|| "This is a test webhook from NexaLine".to_string());

    let result = state
        .dispatcher
        .deliver(&key.user_id, EVENT_WEBHOOK_TEST, json!({ "message": message }))
        .await;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryListParams {
    pub limit: Option<i64>,
}

/// Delivery log of the caller, newest first.
pub async fn list_deliveries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeliveryListParams>,
) -> Result<Json<Vec<WebhookDelivery>>, ApiError> {
    let key = authenticate(state.store.as_ref(), &headers).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DELIVERY_LIMIT)
        .clamp(1, MAX_DELIVERY_LIMIT);

    let deliveries = state.store.list_deliveries(&key.user_id, limit).await?;

    Ok(Json(deliveries))
}

// =============================================================================
// Cron
// =============================================================================

/// Run one rental expiry sweep.
pub async fn expire_rentals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, ApiError> {
    authorize_cron(state.config.cron_secret.as_deref(), &headers)?;

    info!("cron_expire_rentals_triggered");
    let report = state.sweeper.run().await?;

    Ok(Json(report))
}
