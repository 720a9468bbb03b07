//! Webhook envelope and event names.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Event sent by the "test webhook" endpoint.
pub const EVENT_WEBHOOK_TEST: &str = "webhook.test";

/// Event sent when the sweep expires a rental.
pub const EVENT_RENTAL_EXPIRED: &str = "rental.expired";

/// Envelope posted to user endpoints.
///
/// Serializes as `{"id", "event", "timestamp", "data"}` in that order; the
/// signature is computed over exactly these bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub id: Uuid,
    pub event: String,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    /// Build a fresh envelope with a new id and the current time.
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serialize to the body sent over the wire.
    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `2024-05-01T12:00:00.123Z`
fn serialize_iso_millis<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}
