//! Domain event envelope shared by all console services.

use crate::error::EventError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A domain event published by the console services.
///
/// Events are immutable once published. The `event_type` doubles as the
/// routing key and follows the `<domain>.<action>` convention
/// (e.g. `scenario.created`, `track.updated`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique identifier for this event instance.
    pub event_id: Uuid,

    /// Routing key, `<domain>.<action>`.
    pub event_type: String,

    /// Service that produced the event.
    pub source: String,

    /// Opaque event payload. The delivery engine never inspects it.
    pub payload: serde_json::Value,

    /// Correlation id threading a request across services.
    pub correlation_id: Option<String>,

    /// Timestamp when the event was created.
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// The routing-key domain, i.e. the segment before the first dot.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.event_type
            .split_once('.')
            .map_or(self.event_type.as_str(), |(domain, _)| domain)
    }

    /// Serialize to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationFailed {
            event_id: self.event_id,
            cause: e.to_string(),
        })
    }

    /// Parse from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::InvalidEnvelope {
            reason: e.to_string(),
        })
    }

    /// Validate that required fields are present and well-formed.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.is_empty() {
            return Err(EventError::InvalidEnvelope {
                reason: "event_type is empty".to_string(),
            });
        }

        let Some((domain, action)) = self.event_type.split_once('.') else {
            return Err(EventError::InvalidEnvelope {
                reason: format!(
                    "event_type '{}' does not follow the <domain>.<action> convention",
                    self.event_type
                ),
            });
        };

        if domain.is_empty() || action.is_empty() {
            return Err(EventError::InvalidEnvelope {
                reason: format!("event_type '{}' has an empty segment", self.event_type),
            });
        }

        Ok(())
    }
}
