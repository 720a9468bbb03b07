//! Webhook payload signing.
//!
//! Every outbound delivery to a user with a configured secret carries an
//! `X-NexaLine-Signature` header holding the hex HMAC-SHA256 of the exact
//! request body, keyed with that user's webhook secret. Receivers recompute
//! the digest over the raw body they received and compare.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "X-NexaLine-Signature";

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-NexaLine-Event";

/// Header carrying the payload id.
pub const DELIVERY_HEADER: &str = "X-NexaLine-Delivery";

/// Sign a serialized payload.
///
/// Returns `hex(HMAC_SHA256(secret, body))`, or `None` if the key is rejected.
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header value against a received body.
///
/// This is the check a receiving endpoint performs.
///
/// # Arguments
///
/// * `secret` - The user's webhook secret
/// * `body` - The raw request body as received
/// * `signature` - The `X-NexaLine-Signature` header value
///
/// # Returns
///
/// `true` if the signature matches, `false` otherwise.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let Some(expected_signature) = sign_payload(secret, body) else {
        warn!("webhook_signature_invalid_key");
        return false;
    };

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected_signature, &signature.to_ascii_lowercase());

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
