//! Records read and written by the notifier.
//!
//! Users, rentals and API keys are owned by the main application; this
//! service only reads them (and flips rental status). Webhook deliveries are
//! written here and never modified afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User identifier as issued by the main application.
pub type UserId = String;

// =============================================================================
// Users
// =============================================================================

/// Webhook settings stored on the user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct WebhookConfig {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl WebhookConfig {
    /// The configured endpoint, ignoring blank values.
    pub fn endpoint(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// The configured signing secret, ignoring blank values.
    pub fn secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
    }
}

// =============================================================================
// Webhook deliveries
// =============================================================================

/// Terminal outcome of one delivery sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub user_id: UserId,
    pub event: String,
    pub url: String,
    pub payload_id: Uuid,
    /// Last HTTP status observed, 0 when the last attempt never connected
    pub status_code: i32,
    /// Number of HTTP calls made
    pub attempt: i32,
    pub failed: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert request for a delivery record.
#[derive(Debug, Clone)]
pub struct NewWebhookDelivery {
    pub user_id: UserId,
    pub event: String,
    pub url: String,
    pub payload_id: Uuid,
    pub status_code: i32,
    pub attempt: i32,
    pub failed: bool,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NewWebhookDelivery {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> WebhookDelivery {
        WebhookDelivery {
            id,
            user_id: self.user_id,
            event: self.event,
            url: self.url,
            payload_id: self.payload_id,
            status_code: self.status_code,
            attempt: self.attempt,
            failed: self.failed,
            delivered_at: self.delivered_at,
            created_at,
        }
    }
}

// =============================================================================
// Rentals
// =============================================================================

/// Lifecycle state of a phone number rental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalStatus {
    Active,
    Expired,
    Cancelled,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RentalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown rental status: {}", s)),
        }
    }
}

/// A rented phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub id: String,
    pub user_id: UserId,
    /// E.164 formatted number
    pub phone_number: String,
    /// Identifier of the number at the telephony provider
    pub provider_ref: Option<String>,
    pub status: RentalStatus,
    pub expires_at: DateTime<Utc>,
}

impl Rental {
    /// Whether the sweep should expire this rental at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RentalStatus::Active && self.expires_at <= now
    }
}

// =============================================================================
// API keys
// =============================================================================

/// Stored API key. The plaintext key is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub key_prefix: String,
    /// Hex SHA-256 of the full plaintext key
    pub key_hash: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_webhook_config_blank_values() {
        let config = WebhookConfig {
            webhook_url: Some("   ".to_string()),
            webhook_secret: Some("".to_string()),
        };
        assert_eq!(config.endpoint(), None);
        assert_eq!(config.secret(), None);

        let config = WebhookConfig {
            webhook_url: Some(" https://hooks.example.com/in ".to_string()),
            webhook_secret: Some("whsec_abc".to_string()),
        };
        assert_eq!(config.endpoint(), Some("https://hooks.example.com/in"));
        assert_eq!(config.secret(), Some("whsec_abc"));
    }

    #[test]
    fn test_rental_status_from_str() {
        assert_eq!("ACTIVE".parse::<RentalStatus>().unwrap(), RentalStatus::Active);
        assert_eq!("EXPIRED".parse::<RentalStatus>().unwrap(), RentalStatus::Expired);
        assert!("active".parse::<RentalStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&RentalStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn test_rental_is_due() {
        let now = Utc::now();
        let mut rental = Rental {
            id: "rent_1".to_string(),
            user_id: "user_1".to_string(),
            phone_number: "+15550100".to_string(),
            provider_ref: None,
            status: RentalStatus::Active,
            expires_at: now - Duration::minutes(1),
        };
        assert!(rental.is_due(now));

        rental.expires_at = now + Duration::minutes(1);
        assert!(!rental.is_due(now));

        rental.expires_at = now - Duration::minutes(1);
        rental.status = RentalStatus::Cancelled;
        assert!(!rental.is_due(now));
    }
}
