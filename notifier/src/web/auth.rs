//! Request authentication and API error responses.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::api_keys;
use crate::models::ApiKey;
use crate::store::{Store, StoreError};
use crate::webhook::signature::constant_time_compare;

/// Errors returned by the HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("cron endpoint is disabled")]
    CronDisabled,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// JSON error body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::CronDisabled => (StatusCode::SERVICE_UNAVAILABLE, "disabled"),
            ApiError::InvalidBody(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Store(e) => {
                error!(error = %e, "store_error");
                (StatusCode::INTERNAL_SERVER_ERROR, "error")
            }
        };

        let message = match &self {
            ApiError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (code, Json(ErrorResponse { status, message })).into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller's API key.
pub async fn authenticate(store: &dyn Store, headers: &HeaderMap) -> Result<ApiKey, ApiError> {
    let Some(token) = bearer_token(headers) else {
        warn!("api_auth_missing");
        return Err(ApiError::Unauthorized("missing API key"));
    };

    api_keys::verify(store, token)
        .await?
        .ok_or(ApiError::Unauthorized("invalid API key"))
}

/// Check the cron bearer secret.
pub fn authorize_cron(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        warn!("cron_secret_not_configured");
        return Err(ApiError::CronDisabled);
    };

    match bearer_token(headers) {
        Some(provided) if constant_time_compare(provided, expected) => Ok(()),
        Some(_) => {
            warn!("cron_auth_invalid");
            Err(ApiError::Unauthorized("invalid cron secret"))
        }
        None => {
            warn!("cron_auth_missing");
            Err(ApiError::Unauthorized("missing cron secret"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Bearer   ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authorize_cron() {
        assert!(matches!(
            authorize_cron(None, &headers("Bearer s3cret")),
            Err(ApiError::CronDisabled)
        ));
        assert!(authorize_cron(Some("s3cret"), &headers("Bearer s3cret")).is_ok());
        assert!(matches!(
            authorize_cron(Some("s3cret"), &headers("Bearer nope")),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_cron(Some("s3cret"), &HeaderMap::new()),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
