//! Webhook delivery: look up, sign, send with retries, log the outcome.
//!
//! ```text
//! Dispatcher::deliver(user, event, data)
//!   ├─ Store: webhook_config(user)          // no URL → skipped, nothing else
//!   ├─ WebhookPayload::new(event, data)     // {id, event, timestamp, data}
//!   ├─ sign_payload(secret, body)           // only when a secret is set
//!   ├─ for attempt in 1..=max_attempts:
//!   │    ├─ POST url (per-attempt timeout)
//!   │    ├─ 2xx → stop
//!   │    └─ otherwise → backoff, retry
//!   └─ Store: insert_delivery(...)          // exactly one record per sequence
//! ```
//!
//! Nothing here returns an error to the caller. Lookup and logging failures
//! are logged and folded into the returned [`DeliveryResult`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::NewWebhookDelivery;
use crate::store::{abbrev_id, Store};
use crate::webhook::payload::WebhookPayload;
use crate::webhook::signature::{sign_payload, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};

/// How many times, how long, and how far apart delivery attempts are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// HTTP calls per delivery, at least 1
    pub max_attempts: u32,
    /// Timeout of each HTTP call
    pub timeout: Duration,
    /// Backoff ceiling after the first failed attempt
    pub backoff_base: Duration,
    /// Upper bound of any backoff ceiling
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        let (base_ms, cap_ms) = config.webhook_retry_backoff_ms;
        Self {
            max_attempts: config.webhook_max_attempts.max(1),
            timeout: config.webhook_timeout(),
            backoff_base: Duration::from_millis(base_ms),
            backoff_cap: Duration::from_millis(cap_ms),
        }
    }

    /// Retry straight away after a failure.
    pub fn immediate(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout,
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
        }
    }

    /// Largest pause after `failed_attempt` failures: `base * 2^(n-1)`, capped.
    pub fn backoff_ceiling(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap)
    }

    /// Full-jitter pause drawn from `[0, ceiling]`.
    fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let ceiling_ms = self.backoff_ceiling(failed_attempt).as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

/// What a caller of [`Dispatcher::deliver`] gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    /// HTTP calls made
    pub attempts: u32,
    /// No endpoint configured; nothing was sent or logged
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl DeliveryResult {
    pub fn skipped() -> Self {
        Self {
            success: false,
            attempts: 0,
            skipped: true,
        }
    }

    fn not_attempted() -> Self {
        Self {
            success: false,
            attempts: 0,
            skipped: false,
        }
    }
}

/// Outcome of a single HTTP call.
#[derive(Debug)]
enum AttemptOutcome {
    Delivered { status_code: u16 },
    Rejected { status_code: u16 },
    Unreachable { error: String },
}

impl AttemptOutcome {
    /// Status code as logged; 0 when no response arrived.
    fn status_code(&self) -> u16 {
        match self {
            Self::Delivered { status_code } | Self::Rejected { status_code } => *status_code,
            Self::Unreachable { .. } => 0,
        }
    }
}

/// Sends webhook events to user endpoints.
///
/// Cheap to clone; clones share the HTTP connection pool, the store and the
/// set of background deliveries.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    client: Client,
    policy: RetryPolicy,
    tasks: TaskTracker,
}

impl Dispatcher {
    /// Create a dispatcher with its own HTTP client.
    pub fn new(store: Arc<dyn Store>, policy: RetryPolicy) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self::with_client(store, client, policy))
    }

    pub fn with_client(store: Arc<dyn Store>, client: Client, policy: RetryPolicy) -> Self {
        Self {
            store,
            client,
            policy,
            tasks: TaskTracker::new(),
        }
    }

    /// Deliver in the background; the returned handle may be dropped.
    ///
    /// Background deliveries are tracked and awaited by [`Dispatcher::drain`].
    pub fn dispatch(
        &self,
        user_id: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> JoinHandle<DeliveryResult> {
        let dispatcher = self.clone();
        let user_id = user_id.into();
        let event = event.into();

        self.tasks
            .spawn(async move { dispatcher.deliver(&user_id, &event, data).await })
    }

    /// Wait for every background delivery to finish.
    ///
    /// Call before closing the store on shutdown so in-flight deliveries can
    /// still write their record. Deliveries dispatched afterwards are still
    /// tracked.
    pub async fn drain(&self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending_deliveries = pending, "webhook_drain_start");
        }

        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();

        info!(pending_deliveries = pending, "webhook_drain_complete");
    }

    /// Notify a user's endpoint of `event` and log the outcome.
    ///
    /// Makes up to `max_attempts` sequential POSTs, stopping at the first
    /// 2xx. Exactly one delivery record is written unless the user has no
    /// endpoint configured.
    pub async fn deliver(&self, user_id: &str, event: &str, data: serde_json::Value) -> DeliveryResult {
        let config = match self.store.webhook_config(user_id).await {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                error!(
                    user_id = %abbrev_id(user_id),
                    event = event,
                    error = %e,
                    "webhook_config_lookup_failed"
                );
                return DeliveryResult::not_attempted();
            }
        };

        let Some(url) = config.endpoint() else {
            info!(user_id = %abbrev_id(user_id), event = event, "webhook_skipped_no_endpoint");
            return DeliveryResult::skipped();
        };

        let payload = WebhookPayload::new(event, data);
        let body = match payload.to_body() {
            Ok(body) => body,
            Err(e) => {
                error!(
                    user_id = %abbrev_id(user_id),
                    event = event,
                    error = %e,
                    "webhook_payload_serialize_failed"
                );
                return DeliveryResult::not_attempted();
            }
        };

        let signature = config.secret().and_then(|secret| {
            let signature = sign_payload(secret, body.as_bytes());
            if signature.is_none() {
                warn!(user_id = %abbrev_id(user_id), "webhook_sign_failed");
            }
            signature
        });

        let host = endpoint_host(url);
        info!(
            user_id = %abbrev_id(user_id),
            event = event,
            payload_id = %payload.id,
            host = %host,
            signed = signature.is_some(),
            body_length = body.len(),
            "webhook_delivery_start"
        );

        let mut attempts = 0;
        let mut last_status = 0;
        let mut success = false;

        while attempts < self.policy.max_attempts {
            attempts += 1;

            let outcome = self
                .send_attempt(url, &body, &payload, signature.as_deref())
                .await;
            last_status = outcome.status_code();

            match outcome {
                AttemptOutcome::Delivered { status_code } => {
                    info!(
                        payload_id = %payload.id,
                        attempt = attempts,
                        status_code = status_code,
                        "webhook_attempt_delivered"
                    );
                    success = true;
                    break;
                }
                AttemptOutcome::Rejected { status_code } => {
                    warn!(
                        payload_id = %payload.id,
                        attempt = attempts,
                        status_code = status_code,
                        "webhook_attempt_rejected"
                    );
                }
                AttemptOutcome::Unreachable { ref error } => {
                    warn!(
                        payload_id = %payload.id,
                        attempt = attempts,
                        error = %error,
                        "webhook_attempt_unreachable"
                    );
                }
            }

            if attempts < self.policy.max_attempts {
                let delay = self.policy.backoff_delay(attempts);
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }

        let record = NewWebhookDelivery {
            user_id: user_id.to_string(),
            event: event.to_string(),
            url: url.to_string(),
            payload_id: payload.id,
            status_code: i32::from(last_status),
            attempt: attempts as i32,
            failed: !success,
            delivered_at: success.then(Utc::now),
        };

        if let Err(e) = self.store.insert_delivery(record).await {
            error!(
                payload_id = %payload.id,
                error = %e,
                "webhook_delivery_log_failed"
            );
        }

        if success {
            info!(
                user_id = %abbrev_id(user_id),
                payload_id = %payload.id,
                attempts = attempts,
                status_code = last_status,
                "webhook_delivery_complete"
            );
        } else {
            warn!(
                user_id = %abbrev_id(user_id),
                payload_id = %payload.id,
                attempts = attempts,
                status_code = last_status,
                "webhook_delivery_exhausted"
            );
        }

        DeliveryResult {
            success,
            attempts,
            skipped: false,
        }
    }

    /// One POST of the already serialized body.
    async fn send_attempt(
        &self,
        url: &str,
        body: &str,
        payload: &WebhookPayload,
        signature: Option<&str>,
    ) -> AttemptOutcome {
        let mut request = self
            .client
            .post(url)
            .timeout(self.policy.timeout)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, payload.event.as_str())
            .header(DELIVERY_HEADER, payload.id.to_string());

        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        match request.body(body.to_string()).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                if response.status().is_success() {
                    AttemptOutcome::Delivered { status_code }
                } else {
                    AttemptOutcome::Rejected { status_code }
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("timed out after {}ms", self.policy.timeout.as_millis())
                } else {
                    e.to_string()
                };
                AttemptOutcome::Unreachable { error }
            }
        }
    }
}

/// Host of an endpoint URL for log fields; paths may carry tokens.
fn endpoint_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "invalid-url".to_string())
}
