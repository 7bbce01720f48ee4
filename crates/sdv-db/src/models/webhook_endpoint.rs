//! Webhook endpoint model.
//!
//! Endpoint rows are owned by the external administration API; the engine
//! reads active endpoints and writes only the statistics columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::DbError;

/// Retry policy applied to deliveries for one endpoint.
///
/// Invariants: `max_attempts >= 1`, `backoff_multiplier >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub initial_delay_ms: i64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

/// A registered external HTTP receiver subscribed to one or more event types.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEndpoint {
    pub id: Uuid,

    /// Unique human-readable name.
    pub name: String,

    pub description: Option<String>,

    /// Destination URL for deliveries.
    pub url: String,

    /// Signing secret, AES-256-GCM encrypted at rest. None means
    /// deliveries to this endpoint are unsigned.
    pub secret_encrypted: Option<String>,

    /// Inactive endpoints are excluded from all lookups.
    pub is_active: bool,

    /// Subscribed event types: literals (`scenario.created`) or wildcard
    /// patterns (`scenario.*`).
    pub event_types: Vec<String>,

    /// Custom headers merged into every delivery, as a name->value object.
    pub headers: serde_json::Value,

    // Retry policy; NULL columns fall back to the engine defaults
    pub max_attempts: Option<i32>,
    pub initial_delay_ms: Option<i64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<i64>,

    // Statistics
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub last_delivery_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// The effective retry policy, with engine defaults filling unset
    /// columns and the policy invariants clamped.
    #[must_use]
    pub fn effective_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay_ms: self
                .initial_delay_ms
                .unwrap_or(defaults.initial_delay_ms)
                .max(0),
            backoff_multiplier: self
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier)
                .max(1.0),
            max_delay_ms: self.max_delay_ms.unwrap_or(defaults.max_delay_ms).max(0),
        }
    }

    /// Custom headers as name/value pairs, skipping non-string values.
    #[must_use]
    pub fn headers_map(&self) -> Vec<(String, String)> {
        match &self.headers {
            serde_json::Value::Object(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Load all active endpoints.
    pub async fn find_active(pool: &PgPool) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_endpoints
            WHERE is_active
            ORDER BY created_at
            ",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Load one endpoint by id, active or not.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_endpoints
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Record a terminal delivery outcome in the endpoint statistics.
    ///
    /// A single atomic UPDATE: the counters live with the row, so
    /// concurrent executors cannot lose increments.
    pub async fn record_delivery_outcome(
        pool: &PgPool,
        id: Uuid,
        success: bool,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET total_deliveries = total_deliveries + 1,
                successful_deliveries = successful_deliveries + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_deliveries = failed_deliveries + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_delivery_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(success)
        .execute(pool)
        .await?;

        Ok(())
    }
}
