//! Webhook delivery engine service.
//!
//! Wires the pipeline together: bus consumer -> dispatcher -> worker pool,
//! with the retry scheduler and the subscription index refresh running
//! alongside. Shuts down gracefully on SIGTERM/ctrl-c, draining in-flight
//! deliveries before exit.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sdv_events::{EventConsumer, KafkaConfig};
use sdv_webhooks::{
    DeliveryExecutor, DeliveryWorker, Dispatcher, EngineConfig, RetryScheduler, SubscriptionIndex,
};

/// Consumer group for the delivery engine.
const CONSUMER_GROUP: &str = "webhook-engine";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Fail fast on missing configuration.
    let engine_config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let kafka_config = match KafkaConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("Error: DATABASE_URL not set");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker_concurrency = engine_config.worker_concurrency,
        "Starting webhook delivery engine"
    );

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = sdv_db::MIGRATOR.run(&pool).await {
        error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();

    // Subscription index, built once before consumption starts.
    let index = Arc::new(SubscriptionIndex::new());
    match index.rebuild(&pool).await {
        Ok(count) => info!(endpoint_count = count, "Subscription index built"),
        Err(e) => {
            error!(error = %e, "Failed to build subscription index");
            std::process::exit(1);
        }
    }
    let refresh_handle = tokio::spawn(index.clone().run_refresh(
        pool.clone(),
        engine_config.index_refresh_interval,
        shutdown.clone(),
    ));

    // Worker pool behind a bounded dispatch channel.
    let (jobs_tx, jobs_rx) = mpsc::channel(engine_config.queue_capacity);
    let executor = match DeliveryExecutor::new(pool.clone(), &engine_config) {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!(error = %e, "Failed to create delivery executor");
            std::process::exit(1);
        }
    };
    let worker = DeliveryWorker::new(
        executor,
        jobs_rx,
        engine_config.worker_concurrency,
        shutdown.clone(),
    );
    let worker_handle = tokio::spawn(worker.run());
    info!("Delivery worker started");

    // Retry scheduler.
    let scheduler = RetryScheduler::new(
        pool.clone(),
        jobs_tx.clone(),
        &engine_config,
        shutdown.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    // Bus consumer feeding the dispatcher.
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        index.clone(),
        jobs_tx,
        engine_config.default_retry_policy,
    ));
    let consumer = match EventConsumer::new(kafka_config, CONSUMER_GROUP) {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, "Failed to create event consumer");
            std::process::exit(1);
        }
    };
    if let Err(e) = consumer.subscribe_all() {
        error!(error = %e, "Failed to subscribe to domain topics");
        std::process::exit(1);
    }
    let consumer_handle = tokio::spawn(consumer.run(dispatcher, shutdown.clone()));

    info!("Webhook delivery engine running");

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, draining");
    shutdown.cancel();

    // Consumer first so no new work arrives, then the worker drains.
    if let Err(e) = consumer_handle.await {
        error!(error = %e, "Consumer task panicked");
    }
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Worker task panicked");
    }
    let _ = scheduler_handle.await;
    let _ = refresh_handle.await;

    info!("Webhook delivery engine stopped");
}

/// Wait for SIGTERM or ctrl-c.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
