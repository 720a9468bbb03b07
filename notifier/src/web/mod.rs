//! Web server module.
//!
//! A thin HTTP surface over the notifier:
//! - Test webhook delivery and delivery log for API key holders
//! - Cron entry point for the rental expiry sweep
//! - Health check

pub mod auth;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::{ApiError, ErrorResponse};
pub use handlers::{
    expire_rentals, health, list_deliveries, test_webhook, AppState, HealthResponse,
    TestWebhookRequest,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/webhooks/test", post(test_webhook))
        .route("/api/v1/webhooks/deliveries", get(list_deliveries))
        .route("/api/cron/expire-rentals", get(expire_rentals))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
