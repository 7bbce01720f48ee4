//! Delivery ledger: one record per (event, endpoint) pair.
//!
//! Records are created by the dispatcher and mutated only by the executor
//! and the retry scheduler, always through guarded UPDATEs so status
//! transitions stay monotonic and no two workers hold the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Type};
use uuid::Uuid;

use crate::error::DbError;

/// Lifecycle state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Type, Serialize, Deserialize)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, not yet attempted.
    #[default]
    Pending,
    /// Claimed by a worker; at most one per record.
    InProgress,
    /// Delivered, 2xx response. Terminal.
    Success,
    /// Attempt failed. The engine resolves failures to `Retry` or
    /// `DeadLettered`; this state belongs to the administration API's
    /// query surface, which shares the status domain.
    Failed,
    /// Awaiting the next attempt at `next_retry_at`.
    Retry,
    /// Retry budget exhausted. Terminal, no automatic reactivation.
    DeadLettered,
    /// Endpoint deactivated or deleted before completion. Terminal.
    Cancelled,
}

impl DeliveryStatus {
    /// True for states no transition leaves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::DeadLettered | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Input for creating a ledger record.
#[derive(Debug, Clone)]
pub struct NewDeliveryRecord {
    pub webhook_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
}

/// One delivery of one event to one endpoint.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,

    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub status_code: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// True if another attempt may still be made.
    #[must_use]
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Create a PENDING record.
    ///
    /// Returns `None` when a record for this (event, endpoint) pair already
    /// exists; the idempotency key absorbs bus redelivery.
    pub async fn create(pool: &PgPool, new: NewDeliveryRecord) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Self>(
            r"
            INSERT INTO webhook_deliveries
                (webhook_id, event_id, event_type, payload, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id, webhook_id) DO NOTHING
            RETURNING *
            ",
        )
        .bind(new.webhook_id)
        .bind(new.event_id)
        .bind(&new.event_type)
        .bind(&new.payload)
        .bind(new.max_attempts)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Check whether a record exists for the (event, endpoint) pair.
    pub async fn exists(pool: &PgPool, event_id: Uuid, webhook_id: Uuid) -> Result<bool, DbError> {
        let row: (bool,) = sqlx::query_as(
            r"
            SELECT EXISTS(
                SELECT 1 FROM webhook_deliveries
                WHERE event_id = $1 AND webhook_id = $2
            )
            ",
        )
        .bind(event_id)
        .bind(webhook_id)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    /// Load one record by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Claim a record for one delivery attempt.
    ///
    /// Check-and-set PENDING|RETRY -> IN_PROGRESS. Returns the claimed row,
    /// or `None` when another worker holds it or it reached a terminal
    /// state. The caller must then drop the job silently.
    pub async fn claim_for_attempt(pool: &PgPool, id: Uuid) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_as::<_, Self>(
            r"
            UPDATE webhook_deliveries
            SET status = 'in_progress', next_retry_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'retry')
            RETURNING *
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    /// Record a successful attempt. Terminal.
    pub async fn record_success(
        pool: &PgPool,
        id: Uuid,
        status_code: i32,
        response_body: Option<&str>,
        response_time_ms: i32,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'success',
                attempt_count = attempt_count + 1,
                status_code = $2,
                response_body = $3,
                response_time_ms = $4,
                error_message = NULL,
                updated_at = NOW(),
                completed_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            ",
        )
        .bind(id)
        .bind(status_code)
        .bind(response_body)
        .bind(response_time_ms)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record a failed attempt with retry budget left.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_retry(
        pool: &PgPool,
        id: Uuid,
        error_message: &str,
        status_code: Option<i32>,
        response_body: Option<&str>,
        response_time_ms: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'retry',
                attempt_count = attempt_count + 1,
                error_message = $2,
                status_code = $3,
                response_body = $4,
                response_time_ms = $5,
                next_retry_at = $6,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            ",
        )
        .bind(id)
        .bind(error_message)
        .bind(status_code)
        .bind(response_body)
        .bind(response_time_ms)
        .bind(next_retry_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record a failed attempt with the retry budget exhausted. Terminal.
    pub async fn record_dead_lettered(
        pool: &PgPool,
        id: Uuid,
        error_message: &str,
        status_code: Option<i32>,
        response_body: Option<&str>,
        response_time_ms: Option<i32>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'dead_lettered',
                attempt_count = attempt_count + 1,
                error_message = $2,
                status_code = $3,
                response_body = $4,
                response_time_ms = $5,
                next_retry_at = NULL,
                updated_at = NOW(),
                completed_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            ",
        )
        .bind(id)
        .bind(error_message)
        .bind(status_code)
        .bind(response_body)
        .bind(response_time_ms)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Cancel a delivery whose endpoint was deactivated or deleted. Terminal.
    pub async fn cancel(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), DbError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'cancelled',
                error_message = $2,
                next_retry_at = NULL,
                updated_at = NOW(),
                completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'retry', 'in_progress')
            ",
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Find RETRY records whose `next_retry_at` has elapsed.
    pub async fn find_due_for_retry(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE status = 'retry' AND next_retry_at <= $1
            ORDER BY next_retry_at
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Find PENDING records that never reached a worker, e.g. because the
    /// process stopped between fan-out and execution.
    pub async fn find_stale_pending(
        pool: &PgPool,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Requeue IN_PROGRESS records orphaned by a crashed worker.
    ///
    /// Returns the number of records released back to RETRY.
    pub async fn release_stale(
        pool: &PgPool,
        stuck_since: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'retry', next_retry_at = NOW(), updated_at = NOW()
            WHERE status = 'in_progress' AND updated_at < $1
            ",
        )
        .bind(stuck_since)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count records in a given status, for the query surface.
    pub async fn count_by_status(pool: &PgPool, status: DeliveryStatus) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_deliveries WHERE status = $1
            ",
        )
        .bind(status)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::DeadLettered.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());

        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::InProgress.is_terminal());
        assert!(!DeliveryStatus::Retry.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(DeliveryStatus::DeadLettered.as_str(), "dead_lettered");
        assert_eq!(DeliveryStatus::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn test_has_attempts_left() {
        let mut record = DeliveryRecord {
            id: Uuid::new_v4(),
            webhook_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            event_type: "scenario.created".to_string(),
            payload: serde_json::json!({}),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: 3,
            next_retry_at: None,
            status_code: None,
            response_body: None,
            response_time_ms: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };

        assert!(record.has_attempts_left());
        record.attempt_count = 3;
        assert!(!record.has_attempts_left());
    }
}
