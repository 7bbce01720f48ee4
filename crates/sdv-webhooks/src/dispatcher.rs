//! Delivery dispatcher: bridges incoming events to delivery attempts.
//!
//! For each active endpoint matching an event, the dispatcher creates one
//! PENDING ledger record (idempotent against bus redelivery) and hands the
//! delivery to the worker pool. Failure to deliver to one endpoint never
//! affects another: each record is an independent unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use sdv_db::models::{DeliveryRecord, NewDeliveryRecord, RetryPolicy};
use sdv_events::{DomainEvent, EventHandler};

use crate::index::SubscriptionIndex;

/// A delivery handed to the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryJob {
    pub delivery_id: Uuid,
}

/// Fans incoming events out to ledger records and worker jobs.
pub struct Dispatcher {
    pool: PgPool,
    index: Arc<SubscriptionIndex>,
    jobs: mpsc::Sender<DeliveryJob>,
    default_retry_policy: RetryPolicy,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        pool: PgPool,
        index: Arc<SubscriptionIndex>,
        jobs: mpsc::Sender<DeliveryJob>,
        default_retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            index,
            jobs,
            default_retry_policy,
        }
    }

    /// Fan an event out to all matching active endpoints.
    ///
    /// Returns Err only when the fan-out could not be durably recorded;
    /// the caller then leaves the bus offset uncommitted so the event is
    /// redelivered, and the ledger's idempotency key absorbs duplicates.
    pub async fn dispatch(&self, event: &DomainEvent) -> Result<(), sdv_db::DbError> {
        let endpoints = self.index.matching(&event.event_type).await;

        if endpoints.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No active subscriptions match event type"
            );
            return Ok(());
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            endpoint_count = endpoints.len(),
            "Dispatching event to matching endpoints"
        );

        let mut ledger_error = None;

        for endpoint in endpoints {
            // Idempotent redelivery protection: skip pairs already recorded.
            match DeliveryRecord::exists(&self.pool, event.event_id, endpoint.id).await {
                Ok(true) => {
                    tracing::debug!(
                        target: "webhook_delivery",
                        event_id = %event.event_id,
                        webhook_id = %endpoint.id,
                        "Delivery record already exists, skipping"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event.event_id,
                        webhook_id = %endpoint.id,
                        error = %e,
                        "Failed to check for existing delivery record"
                    );
                    ledger_error = Some(e);
                    continue;
                }
            }

            let policy = endpoint.effective_policy(&self.default_retry_policy);

            let record = match DeliveryRecord::create(
                &self.pool,
                NewDeliveryRecord {
                    webhook_id: endpoint.id,
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    payload: event.payload.clone(),
                    max_attempts: policy.max_attempts,
                },
            )
            .await
            {
                // The exists() check raced a concurrent dispatch; the
                // conflict-free insert makes the duplicate harmless.
                Ok(None) => continue,
                Ok(Some(record)) => record,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event.event_id,
                        webhook_id = %endpoint.id,
                        error = %e,
                        "Failed to create delivery record"
                    );
                    ledger_error = Some(e);
                    continue;
                }
            };

            if let Err(e) = self
                .jobs
                .send(DeliveryJob {
                    delivery_id: record.id,
                })
                .await
            {
                // Worker gone (shutdown). The PENDING record survives and
                // the stale-release sweep will pick it up on restart.
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %record.id,
                    error = %e,
                    "Worker channel closed, delivery left pending"
                );
            }
        }

        match ledger_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn handle(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.dispatch(&event).await.map_err(Into::into)
    }
}
