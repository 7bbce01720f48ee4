//! Engine configuration.

use std::env;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sdv_db::models::RetryPolicy;

use crate::error::WebhookError;

/// Default ceiling on a single HTTP delivery attempt.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent in-flight HTTP deliveries.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

/// Default capacity of the dispatch channel feeding the worker pool.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default retry scheduler poll interval.
pub const DEFAULT_RETRY_POLL_INTERVAL_SECS: u64 = 5;

/// Default batch of due retries picked up per poll.
pub const DEFAULT_RETRY_BATCH_SIZE: i64 = 50;

/// Default subscription index refresh interval.
pub const DEFAULT_INDEX_REFRESH_SECS: u64 = 30;

/// Default age after which an in-progress record is considered orphaned.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

/// User agent sent with every delivery.
pub const USER_AGENT: &str = "sdv-webhook-engine/1.0";

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on a single HTTP delivery attempt.
    pub http_timeout: Duration,
    /// Maximum concurrent in-flight HTTP deliveries.
    pub worker_concurrency: usize,
    /// Capacity of the dispatch channel feeding the worker pool.
    pub queue_capacity: usize,
    /// Retry scheduler poll interval.
    pub retry_poll_interval: Duration,
    /// Due retries claimed per poll.
    pub retry_batch_size: i64,
    /// Subscription index refresh interval.
    pub index_refresh_interval: Duration,
    /// Age after which an in-progress record is released back to retry.
    pub stale_after: chrono::Duration,
    /// Retry policy applied when an endpoint sets none.
    pub default_retry_policy: RetryPolicy,
    /// AES-256 key for endpoint secrets at rest (32 bytes).
    pub encryption_key: Vec<u8>,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WEBHOOK_ENCRYPTION_KEY`: base64-encoded 32-byte key
    ///
    /// Optional (defaults in parentheses):
    /// - `WEBHOOK_HTTP_TIMEOUT_SECS` (10)
    /// - `WEBHOOK_WORKER_CONCURRENCY` (8)
    /// - `WEBHOOK_QUEUE_CAPACITY` (256)
    /// - `WEBHOOK_RETRY_POLL_INTERVAL_SECS` (5)
    /// - `WEBHOOK_RETRY_BATCH_SIZE` (50)
    /// - `WEBHOOK_INDEX_REFRESH_SECS` (30)
    /// - `WEBHOOK_STALE_AFTER_SECS` (300)
    /// - `WEBHOOK_DEFAULT_MAX_ATTEMPTS` (3)
    /// - `WEBHOOK_DEFAULT_INITIAL_DELAY_MS` (5000)
    /// - `WEBHOOK_DEFAULT_BACKOFF_MULTIPLIER` (2.0)
    /// - `WEBHOOK_DEFAULT_MAX_DELAY_MS` (300000)
    pub fn from_env() -> Result<Self, WebhookError> {
        let encryption_key = env::var("WEBHOOK_ENCRYPTION_KEY")
            .map_err(|_| WebhookError::ConfigInvalid {
                var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
                reason: "not set".to_string(),
            })
            .and_then(|v| {
                BASE64.decode(&v).map_err(|e| WebhookError::ConfigInvalid {
                    var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
                    reason: format!("invalid base64: {e}"),
                })
            })?;

        if encryption_key.len() != 32 {
            return Err(WebhookError::ConfigInvalid {
                var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
                reason: format!("expected 32 bytes, got {}", encryption_key.len()),
            });
        }

        let defaults = RetryPolicy::default();

        Ok(Self {
            http_timeout: Duration::from_secs(parse_env(
                "WEBHOOK_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            worker_concurrency: parse_env(
                "WEBHOOK_WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )?,
            queue_capacity: parse_env("WEBHOOK_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            retry_poll_interval: Duration::from_secs(parse_env(
                "WEBHOOK_RETRY_POLL_INTERVAL_SECS",
                DEFAULT_RETRY_POLL_INTERVAL_SECS,
            )?),
            retry_batch_size: parse_env("WEBHOOK_RETRY_BATCH_SIZE", DEFAULT_RETRY_BATCH_SIZE)?,
            index_refresh_interval: Duration::from_secs(parse_env(
                "WEBHOOK_INDEX_REFRESH_SECS",
                DEFAULT_INDEX_REFRESH_SECS,
            )?),
            stale_after: chrono::Duration::seconds(parse_env(
                "WEBHOOK_STALE_AFTER_SECS",
                DEFAULT_STALE_AFTER_SECS,
            )?),
            default_retry_policy: RetryPolicy {
                max_attempts: parse_env("WEBHOOK_DEFAULT_MAX_ATTEMPTS", defaults.max_attempts)?,
                initial_delay_ms: parse_env(
                    "WEBHOOK_DEFAULT_INITIAL_DELAY_MS",
                    defaults.initial_delay_ms,
                )?,
                backoff_multiplier: parse_env(
                    "WEBHOOK_DEFAULT_BACKOFF_MULTIPLIER",
                    defaults.backoff_multiplier,
                )?,
                max_delay_ms: parse_env("WEBHOOK_DEFAULT_MAX_DELAY_MS", defaults.max_delay_ms)?,
            },
            encryption_key,
        })
    }

    /// A configuration with defaults and the given encryption key, for
    /// embedding and tests.
    #[must_use]
    pub fn with_encryption_key(encryption_key: Vec<u8>) -> Self {
        Self {
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_poll_interval: Duration::from_secs(DEFAULT_RETRY_POLL_INTERVAL_SECS),
            retry_batch_size: DEFAULT_RETRY_BATCH_SIZE,
            index_refresh_interval: Duration::from_secs(DEFAULT_INDEX_REFRESH_SECS),
            stale_after: chrono::Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            default_retry_policy: RetryPolicy::default(),
            encryption_key,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the worker pool size.
    #[must_use]
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    /// Set the default retry policy.
    #[must_use]
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T, WebhookError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(v) => v.parse().map_err(|e| WebhookError::ConfigInvalid {
            var: var.to_string(),
            reason: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}
