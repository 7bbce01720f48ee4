//! Retry scheduler.
//!
//! Periodically finds ledger records due for retry and resubmits them to
//! the worker pool. A Postgres advisory lock keeps at most one instance
//! sweeping when the engine is horizontally scaled; the ledger's
//! check-and-set claim remains the last line of defense underneath it.

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sdv_db::models::{DeliveryRecord, WebhookEndpoint};

use crate::config::EngineConfig;
use crate::dispatcher::DeliveryJob;

/// Advisory lock namespace for the retry sweep.
const RETRY_LOCK_NAMESPACE: i32 = 7301;
/// Advisory lock key within the namespace.
const RETRY_LOCK_KEY: i32 = 1;

/// Polls the ledger for due retries and resubmits them.
pub struct RetryScheduler {
    pool: PgPool,
    jobs: mpsc::Sender<DeliveryJob>,
    poll_interval: std::time::Duration,
    batch_size: i64,
    stale_after: chrono::Duration,
    shutdown: CancellationToken,
}

impl RetryScheduler {
    /// Create a new scheduler.
    pub fn new(
        pool: PgPool,
        jobs: mpsc::Sender<DeliveryJob>,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            jobs,
            poll_interval: config.retry_poll_interval,
            batch_size: config.retry_batch_size,
            stale_after: config.stale_after,
            shutdown,
        }
    }

    /// Run the polling loop until shutdown is requested.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "Retry scheduler started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping retry scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Retry sweep failed");
                    }
                }
            }
        }

        info!("Retry scheduler stopped");
    }

    /// One sweep: requeue strays, then resubmit everything due.
    ///
    /// The advisory lock lives on a single pooled connection for the whole
    /// sweep; another instance holding it skips this round.
    async fn sweep(&self) -> Result<(), sqlx::Error> {
        let mut lock_conn = self.pool.acquire().await?;

        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1, $2)")
            .bind(RETRY_LOCK_NAMESPACE)
            .bind(RETRY_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await?;

        if !locked {
            debug!("Retry sweep already running on another instance, skipping");
            return Ok(());
        }

        let result = self.sweep_locked().await;

        let _: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1, $2)")
            .bind(RETRY_LOCK_NAMESPACE)
            .bind(RETRY_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await?;

        result
    }

    async fn sweep_locked(&self) -> Result<(), sqlx::Error> {
        let now = Utc::now();

        // Records orphaned by a crash: stuck in-progress back to retry,
        // stuck pending straight back onto the worker channel.
        match DeliveryRecord::release_stale(&self.pool, now - self.stale_after).await {
            Ok(released) if released > 0 => {
                warn!(released, "Released stale in-progress deliveries");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to release stale deliveries");
            }
        }

        match DeliveryRecord::find_stale_pending(
            &self.pool,
            now - self.stale_after,
            self.batch_size,
        )
        .await
        {
            Ok(stranded) => {
                for record in stranded {
                    self.resubmit(record).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to find stranded pending deliveries");
            }
        }

        let due = match DeliveryRecord::find_due_for_retry(&self.pool, now, self.batch_size).await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to find due retries");
                return Ok(());
            }
        };

        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "Resubmitting due retries");

        for record in due {
            self.resubmit(record).await;
        }

        Ok(())
    }

    /// Resubmit one record, unless its endpoint went inactive since the
    /// record was created; activation is checked at resubmission time.
    async fn resubmit(&self, record: DeliveryRecord) {
        let active = match self.endpoint_active(record.webhook_id).await {
            Ok(active) => active,
            Err(e) => {
                error!(
                    delivery_id = %record.id,
                    error = %e,
                    "Failed to check endpoint activation, leaving record for next sweep"
                );
                return;
            }
        };

        if !active {
            info!(
                target: "webhook_delivery",
                delivery_id = %record.id,
                webhook_id = %record.webhook_id,
                "Cancelling scheduled retry, endpoint inactive"
            );
            if let Err(e) =
                DeliveryRecord::cancel(&self.pool, record.id, "Endpoint deactivated").await
            {
                error!(
                    delivery_id = %record.id,
                    error = %e,
                    "Failed to cancel delivery"
                );
            }
            return;
        }

        if self
            .jobs
            .send(DeliveryJob {
                delivery_id: record.id,
            })
            .await
            .is_err()
        {
            // Worker shut down; the record stays due and the next sweep
            // (on a live instance) picks it up.
            warn!(
                delivery_id = %record.id,
                "Worker channel closed, retry left scheduled"
            );
        }
    }

    /// Whether the record's endpoint is currently active. Answered by the
    /// DB, not the index, so a stale index cannot resurrect an endpoint
    /// the admin API deactivated mid-flight.
    async fn endpoint_active(&self, webhook_id: uuid::Uuid) -> Result<bool, sdv_db::DbError> {
        let endpoint = WebhookEndpoint::find_by_id(&self.pool, webhook_id).await?;
        Ok(endpoint.map(|e| e.is_active).unwrap_or(false))
    }
}
