//! # sdv-events
//!
//! Kafka event bus adapter for the SDV developer console.
//!
//! Provides durable, at-least-once consumption of domain events from the
//! per-domain topics, dead-letter routing for unprocessable messages, and a
//! producer for publishing events and dead letters.
//!
//! ## Cargo Features
//!
//! - `kafka`: Enable the Kafka producer/consumer (requires librdkafka)

// Core modules (always available)
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod health;
pub mod topics;

// Kafka-dependent modules (require `kafka` feature)
#[cfg(feature = "kafka")]
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod producer;

pub use config::{KafkaConfig, KafkaConfigBuilder};
pub use envelope::DomainEvent;
pub use error::EventError;
pub use handler::EventHandler;
pub use health::HealthStatus;
pub use topics::EventTopic;

#[cfg(feature = "kafka")]
pub use consumer::EventConsumer;
#[cfg(feature = "kafka")]
pub use producer::EventProducer;
