//! Delivery worker pool.
//!
//! Consumes delivery jobs from the dispatch channel and executes them with
//! a bounded number of concurrent HTTP deliveries, so a slow endpoint can
//! never stall event consumption or grow resource use without bound.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatcher::DeliveryJob;
use crate::executor::DeliveryExecutor;

/// Bounded worker pool executing delivery attempts.
pub struct DeliveryWorker {
    executor: Arc<DeliveryExecutor>,
    jobs: mpsc::Receiver<DeliveryJob>,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    /// Create a new worker pool.
    pub fn new(
        executor: Arc<DeliveryExecutor>,
        jobs: mpsc::Receiver<DeliveryJob>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            executor,
            jobs,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// Run until the channel closes or shutdown is requested, then drain
    /// in-flight deliveries.
    pub async fn run(mut self) {
        info!(
            concurrency = self.concurrency,
            "Delivery worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping delivery worker");
                    break;
                }
                job = self.jobs.recv() => {
                    let Some(job) = job else {
                        info!("Job channel closed, stopping delivery worker");
                        break;
                    };

                    // Blocks when all slots are busy, backpressuring the
                    // dispatch channel rather than spawning unboundedly.
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };

                    let executor = self.executor.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        executor.execute(job.delivery_id).await;
                    });

                    debug!(delivery_id = %job.delivery_id, "Delivery job started");
                }
            }
        }

        // Wait for in-flight deliveries to finish.
        info!("Waiting for in-flight deliveries to complete");
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("Delivery worker stopped");
    }
}
