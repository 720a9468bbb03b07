//! Outbound webhook notifications.
//!
//! - [`payload`]: the `{id, event, timestamp, data}` envelope
//! - [`signature`]: HMAC-SHA256 signing of the serialized envelope
//! - [`dispatcher`]: bounded retry loop and delivery logging

pub mod dispatcher;
pub mod payload;
pub mod signature;

pub use dispatcher::{DeliveryResult, Dispatcher, RetryPolicy};
pub use payload::{WebhookPayload, EVENT_RENTAL_EXPIRED, EVENT_WEBHOOK_TEST};
pub use signature::{sign_payload, verify_signature};
