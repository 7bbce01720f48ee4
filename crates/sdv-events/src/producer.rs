//! Kafka event producer.

use crate::config::KafkaConfig;
use crate::envelope::DomainEvent;
use crate::error::EventError;
use crate::health::HealthStatus;
use crate::topics::EventTopic;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Kafka event producer for publishing domain events and dead letters.
pub struct EventProducer {
    producer: FutureProducer,
    #[allow(dead_code)]
    config: KafkaConfig,
}

impl EventProducer {
    /// Create a new event producer with the given configuration.
    pub fn new(config: KafkaConfig) -> Result<Self, EventError> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("security.protocol", config.security_protocol.as_str())
            .set("message.timeout.ms", "5000")
            .set("acks", "all");

        if let Some(sasl) = &config.sasl {
            client_config
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| EventError::ConnectionFailed {
                    broker: config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                })?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Event producer created"
        );

        Ok(Self { producer, config })
    }

    /// Publish a domain event, routed by its event type's domain.
    #[instrument(skip(self, event), fields(
        event_id = %event.event_id,
        event_type = %event.event_type
    ))]
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        event.validate()?;

        let topic = EventTopic::for_event_type(&event.event_type).ok_or_else(|| {
            EventError::InvalidEnvelope {
                reason: format!("no topic for event type '{}'", event.event_type),
            }
        })?;

        let key = event.event_id.to_string();
        let payload = event.to_json_bytes()?;
        self.publish_raw(topic.topic(), &key, &payload).await
    }

    /// Publish raw bytes to a topic. Used for dead-letter routing of
    /// messages that never parsed into an event.
    pub async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), EventError> {
        debug!(
            topic = %topic,
            key = %key,
            payload_size = payload.len(),
            "Publishing message"
        );

        let record = FutureRecord::to(topic).key(key).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                topic: topic.to_string(),
                cause: err.to_string(),
            })?;

        debug!(partition, offset, "Message published");

        Ok(())
    }

    /// Check the health of the broker connection.
    pub async fn health_check(&self) -> Result<HealthStatus, EventError> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(None, Duration::from_secs(5))
            .map_err(
                |e: rdkafka::error::KafkaError| EventError::ConnectionFailed {
                    broker: self.config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                },
            )?;

        Ok(HealthStatus {
            connected: true,
            brokers: metadata.brokers().len(),
            topics: metadata.topics().len(),
        })
    }
}
