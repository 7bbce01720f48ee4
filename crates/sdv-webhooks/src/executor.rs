//! HTTP delivery execution.
//!
//! Performs one signed delivery attempt for a claimed ledger record and
//! folds the outcome back into the ledger: success, a scheduled retry with
//! exponential backoff, or dead-lettering once the budget is exhausted.
//! Transport and serialization errors never propagate past this module.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use sqlx::PgPool;
use uuid::Uuid;

use sdv_db::models::{DeliveryRecord, RetryPolicy, WebhookEndpoint};

use crate::config::{EngineConfig, USER_AGENT};
use crate::error::WebhookError;
use crate::outcome::AttemptOutcome;
use crate::signing;

/// Response bodies stored on the record are truncated to this length.
const MAX_STORED_BODY_CHARS: usize = 4096;

/// Header carrying the ledger record id.
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-ID";
/// Header carrying the event id.
pub const EVENT_ID_HEADER: &str = "X-Event-ID";
/// Header carrying the event type.
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
/// Header carrying the HMAC payload signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Executes single delivery attempts and records their outcomes.
#[derive(Clone)]
pub struct DeliveryExecutor {
    pool: PgPool,
    http_client: Client,
    encryption_key: Vec<u8>,
    default_retry_policy: RetryPolicy,
}

impl DeliveryExecutor {
    /// Create a new executor with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(pool: PgPool, config: &EngineConfig) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            pool,
            http_client,
            encryption_key: config.encryption_key.clone(),
            default_retry_policy: config.default_retry_policy,
        })
    }

    /// Execute one delivery attempt for a ledger record.
    ///
    /// Claims the record (PENDING|RETRY -> IN_PROGRESS); a failed claim
    /// means another worker holds it or it already completed, and the job
    /// is dropped. All outcomes are absorbed into ledger state.
    pub async fn execute(&self, delivery_id: Uuid) {
        let record = match DeliveryRecord::claim_for_attempt(&self.pool, delivery_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    "Record not claimable, dropping job"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    error = %e,
                    "Failed to claim delivery record"
                );
                return;
            }
        };

        let endpoint = match WebhookEndpoint::find_by_id(&self.pool, record.webhook_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    webhook_id = %record.webhook_id,
                    "Cancelling delivery, endpoint deleted"
                );
                if let Err(e) =
                    DeliveryRecord::cancel(&self.pool, record.id, "Endpoint deleted").await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %record.id,
                        error = %e,
                        "Failed to cancel delivery"
                    );
                }
                return;
            }
            Err(e) => {
                // No attempt was made; leave the record in progress and
                // let the stale-release sweep requeue it.
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    error = %e,
                    "Failed to load endpoint, leaving record for stale release"
                );
                return;
            }
        };

        if !endpoint.is_active {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %record.id,
                webhook_id = %endpoint.id,
                "Cancelling delivery, endpoint deactivated"
            );
            if let Err(e) =
                DeliveryRecord::cancel(&self.pool, record.id, "Endpoint deactivated").await
            {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    error = %e,
                    "Failed to cancel delivery"
                );
            }
            return;
        }

        let outcome = attempt_delivery(
            &self.http_client,
            &self.encryption_key,
            &endpoint,
            &record,
        )
        .await;

        self.record_outcome(&record, &endpoint, outcome).await;
    }

    /// Fold an attempt outcome into the ledger and endpoint statistics.
    async fn record_outcome(
        &self,
        record: &DeliveryRecord,
        endpoint: &WebhookEndpoint,
        outcome: AttemptOutcome,
    ) {
        // The attempt just made, 1-indexed.
        let attempt_number = record.attempt_count + 1;

        match outcome {
            AttemptOutcome::Success {
                status_code,
                response_body,
                response_time_ms,
            } => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    webhook_id = %endpoint.id,
                    event_id = %record.event_id,
                    event_type = %record.event_type,
                    status_code,
                    response_time_ms,
                    attempt_number,
                    "Delivery succeeded"
                );

                if let Err(e) = DeliveryRecord::record_success(
                    &self.pool,
                    record.id,
                    status_code,
                    Some(truncate_body(&response_body).as_str()),
                    response_time_ms,
                )
                .await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %record.id,
                        error = %e,
                        "Failed to record delivery success"
                    );
                }

                if let Err(e) =
                    WebhookEndpoint::record_delivery_outcome(&self.pool, endpoint.id, true).await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        webhook_id = %endpoint.id,
                        error = %e,
                        "Failed to update endpoint statistics"
                    );
                }
            }
            AttemptOutcome::RetryableFailure {
                error_message,
                status_code,
                response_body,
                response_time_ms,
            } => {
                let exhausted = attempt_number >= record.max_attempts;
                let body = response_body.as_deref().map(truncate_body);

                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    webhook_id = %endpoint.id,
                    event_id = %record.event_id,
                    event_type = %record.event_type,
                    error = %error_message,
                    attempt_number,
                    max_attempts = record.max_attempts,
                    exhausted,
                    "Delivery failed"
                );

                if exhausted {
                    if let Err(e) = DeliveryRecord::record_dead_lettered(
                        &self.pool,
                        record.id,
                        &error_message,
                        status_code,
                        body.as_deref(),
                        response_time_ms,
                    )
                    .await
                    {
                        tracing::error!(
                            target: "webhook_delivery",
                            delivery_id = %record.id,
                            error = %e,
                            "Failed to dead-letter delivery"
                        );
                    }

                    if let Err(e) =
                        WebhookEndpoint::record_delivery_outcome(&self.pool, endpoint.id, false)
                            .await
                    {
                        tracing::error!(
                            target: "webhook_delivery",
                            webhook_id = %endpoint.id,
                            error = %e,
                            "Failed to update endpoint statistics"
                        );
                    }
                } else {
                    let policy = endpoint.effective_policy(&self.default_retry_policy);
                    let retry_at = next_retry_at(&policy, attempt_number + 1, Utc::now());

                    if let Err(e) = DeliveryRecord::schedule_retry(
                        &self.pool,
                        record.id,
                        &error_message,
                        status_code,
                        body.as_deref(),
                        response_time_ms,
                        retry_at,
                    )
                    .await
                    {
                        tracing::error!(
                            target: "webhook_delivery",
                            delivery_id = %record.id,
                            error = %e,
                            "Failed to schedule retry"
                        );
                    }
                }
            }
        }
    }
}

/// Perform one signed HTTP POST to an endpoint. Pure transport: the ledger
/// is untouched, every failure folds into the returned outcome.
pub async fn attempt_delivery(
    http_client: &Client,
    encryption_key: &[u8],
    endpoint: &WebhookEndpoint,
    record: &DeliveryRecord,
) -> AttemptOutcome {
    let body = match serde_json::to_vec(&record.payload) {
        Ok(b) => b,
        Err(e) => {
            return AttemptOutcome::RetryableFailure {
                error_message: format!("Failed to serialize payload: {e}"),
                status_code: None,
                response_body: None,
                response_time_ms: None,
            };
        }
    };

    // Header values come from validated UUIDs and constants; parse errors
    // cannot occur, so failed inserts are simply skipped.
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(v) = "application/json".parse() {
        headers.insert("Content-Type", v);
    }
    if let Ok(v) = record.id.to_string().parse() {
        headers.insert(DELIVERY_ID_HEADER, v);
    }
    if let Ok(v) = record.event_id.to_string().parse() {
        headers.insert(EVENT_ID_HEADER, v);
    }
    if let Ok(v) = record.event_type.parse() {
        headers.insert(EVENT_TYPE_HEADER, v);
    }

    // Endpoint custom headers may override the defaults, never the signature.
    for (name, value) in endpoint.headers_map() {
        if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            value.parse::<reqwest::header::HeaderValue>(),
        ) {
            headers.insert(name, value);
        }
    }

    // Sign with the endpoint secret when one is configured.
    if let Some(ref secret_encrypted) = endpoint.secret_encrypted {
        match signing::decrypt_secret(secret_encrypted, encryption_key) {
            Ok(secret) => {
                if let Ok(v) = signing::signature_header(&secret, &body).parse() {
                    headers.insert(SIGNATURE_HEADER, v);
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    webhook_id = %endpoint.id,
                    error = %e,
                    "Failed to decrypt endpoint secret, delivering unsigned"
                );
            }
        }
    }

    let start = Instant::now();
    let result = http_client
        .post(&endpoint.url)
        .headers(headers)
        .body(body)
        .send()
        .await;
    let response_time_ms = start.elapsed().as_millis() as i32;

    match result {
        Ok(response) => {
            let status_code = i32::from(response.status().as_u16());
            let body = response.text().await.unwrap_or_default();
            AttemptOutcome::from_response(status_code, body, response_time_ms)
        }
        Err(e) => {
            let error_message = if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                format!("Connection failed: {e}")
            } else {
                format!("Request error: {e}")
            };

            AttemptOutcome::RetryableFailure {
                error_message,
                status_code: None,
                response_body: None,
                response_time_ms: Some(response_time_ms),
            }
        }
    }
}

/// Backoff delay before the n-th attempt (1-indexed):
/// `min(initial_delay * multiplier^(n-1), max_delay)`.
#[must_use]
pub fn retry_delay(policy: &RetryPolicy, attempt_number: i32) -> Duration {
    let exponent = (attempt_number - 1).max(0);
    let raw = policy.initial_delay_ms as f64 * policy.backoff_multiplier.powi(exponent);
    let capped = raw.min(policy.max_delay_ms as f64);
    Duration::milliseconds(capped as i64)
}

/// The retry timestamp for the about-to-be-attempted attempt number.
#[must_use]
pub fn next_retry_at(
    policy: &RetryPolicy,
    attempt_number: i32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    now + retry_delay(policy, attempt_number)
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_STORED_BODY_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
