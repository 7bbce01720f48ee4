//! Error types for the sdv-events crate.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during event bus operations.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Connection errors (transient, retry with backoff)
    /// Failed to connect to the broker.
    #[error("Connection to broker {broker} failed: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    // Publishing errors
    /// Failed to publish an event to a topic.
    #[error("Failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    /// Failed to serialize an event.
    #[error("Failed to serialize event {event_id}: {cause}")]
    SerializationFailed { event_id: Uuid, cause: String },

    // Consuming errors
    /// Failed to consume from a topic.
    #[error("Failed to consume from topic {topic}: {cause}")]
    ConsumeFailed { topic: String, cause: String },

    /// A message could not be parsed into a domain event.
    #[error("Invalid event envelope: {reason}")]
    InvalidEnvelope { reason: String },

    /// The event handler failed.
    #[error("Handler failed for event {event_id}: {cause}")]
    HandlerFailed { event_id: Uuid, cause: String },

    // Internal Kafka errors
    /// Internal Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl EventError {
    /// Returns true if this error is transient and can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::ConnectionFailed { .. }
                | EventError::PublishFailed { .. }
                | EventError::ConsumeFailed { .. }
                | EventError::HandlerFailed { .. }
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EventError::ConfigMissing { .. } | EventError::ConfigInvalid { .. }
        )
    }
}
