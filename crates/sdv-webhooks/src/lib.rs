//! Event-driven webhook delivery engine.
//!
//! Takes domain events off the bus, fans them out to subscribed endpoints,
//! delivers over HTTP with HMAC-SHA256 signing, and guarantees eventual
//! delivery or definitive failure through bounded exponential-backoff
//! retries with dead-lettering.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod index;
pub mod outcome;
pub mod retry;
pub mod signing;
pub mod worker;

pub use config::EngineConfig;
pub use dispatcher::{DeliveryJob, Dispatcher};
pub use error::WebhookError;
pub use executor::DeliveryExecutor;
pub use index::SubscriptionIndex;
pub use outcome::AttemptOutcome;
pub use retry::RetryScheduler;
pub use worker::DeliveryWorker;
