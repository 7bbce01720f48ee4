//! Kafka event consumer with dead-letter routing for poison messages.

use crate::config::KafkaConfig;
use crate::envelope::DomainEvent;
use crate::error::EventError;
use crate::handler::EventHandler;
use crate::producer::EventProducer;
use crate::topics::EventTopic;

use futures_util::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::TopicPartitionList;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Kafka event consumer for the per-domain topics.
///
/// Consumption is at-least-once: the offset is committed only after the
/// handler has recorded the event, so a crash in between causes redelivery.
/// Messages that fail to parse are published to the paired dead-letter
/// topic and committed, never retried.
pub struct EventConsumer {
    consumer: StreamConsumer,
    dead_letters: EventProducer,
    consumer_group: String,
}

impl EventConsumer {
    /// Create a new event consumer.
    pub fn new(config: KafkaConfig, consumer_group: impl Into<String>) -> Result<Self, EventError> {
        let consumer_group = consumer_group.into();

        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("group.id", &consumer_group)
            .set("security.protocol", config.security_protocol.as_str())
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000");

        if let Some(sasl) = &config.sasl {
            client_config
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        let consumer: StreamConsumer =
            client_config
                .create()
                .map_err(|e| EventError::ConnectionFailed {
                    broker: config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                })?;

        let dead_letters = EventProducer::new(config)?;

        info!(
            consumer_group = %consumer_group,
            "Event consumer created"
        );

        Ok(Self {
            consumer,
            dead_letters,
            consumer_group,
        })
    }

    /// Subscribe to all domain topics.
    pub fn subscribe_all(&self) -> Result<(), EventError> {
        let topics: Vec<&str> = EventTopic::ALL.iter().map(|t| t.topic()).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| EventError::ConsumeFailed {
                topic: topics.join(","),
                cause: e.to_string(),
            })?;

        info!(topics = %topics.join(","), "Subscribed to domain topics");
        Ok(())
    }

    /// Run the consumer loop until the token is cancelled.
    #[instrument(skip(self, handler, shutdown), fields(consumer_group = %self.consumer_group))]
    pub async fn run<H: EventHandler>(
        self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<(), EventError> {
        info!("Starting consumer loop");

        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping consumer loop");
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(message)) => {
                            if let Err(e) = self.process_message(handler.as_ref(), &message).await {
                                error!(error = %e, "Failed to process message");
                                // Offset stays uncommitted; the message is redelivered.
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                        }
                        None => break,
                    }
                }
            }
        }

        info!("Consumer loop ended");
        Ok(())
    }

    /// Process a single message.
    async fn process_message<H: EventHandler>(
        &self,
        handler: &H,
        message: &rdkafka::message::BorrowedMessage<'_>,
    ) -> Result<(), EventError> {
        let topic = message.topic();

        let Some(payload) = message.payload() else {
            warn!(topic = %topic, "Empty payload, routing to dead letter");
            self.dead_letter(message, b"").await?;
            self.commit_offset(message)?;
            return Ok(());
        };

        let event = match DomainEvent::from_bytes(payload).and_then(|e| {
            e.validate()?;
            Ok(e)
        }) {
            Ok(event) => event,
            Err(e) => {
                // Poison message: never retried, surfaced on the DLQ.
                warn!(
                    topic = %topic,
                    error = %e,
                    "Unparseable message, routing to dead letter"
                );
                self.dead_letter(message, payload).await?;
                self.commit_offset(message)?;
                return Ok(());
            }
        };

        let event_id = event.event_id;

        debug!(
            event_id = %event_id,
            event_type = %event.event_type,
            topic = %topic,
            "Received event"
        );

        match handler.handle(event).await {
            Ok(()) => {
                debug!(event_id = %event_id, "Event processed");
                self.commit_offset(message)?;
                Ok(())
            }
            Err(e) => Err(EventError::HandlerFailed {
                event_id,
                cause: e.to_string(),
            }),
        }
    }

    /// Publish a message's payload to the paired dead-letter topic.
    async fn dead_letter(
        &self,
        message: &rdkafka::message::BorrowedMessage<'_>,
        payload: &[u8],
    ) -> Result<(), EventError> {
        let dlq = EventTopic::for_topic_name(message.topic())
            .map(|t| t.dlq_topic().to_string())
            .unwrap_or_else(|| format!("{}.dlq", message.topic()));

        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();

        self.dead_letters.publish_raw(&dlq, &key, payload).await
    }

    /// Commit the offset for a message.
    fn commit_offset(
        &self,
        message: &rdkafka::message::BorrowedMessage<'_>,
    ) -> Result<(), EventError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            message.topic(),
            message.partition(),
            rdkafka::Offset::Offset(message.offset() + 1),
        )
        .map_err(|e| EventError::ConsumeFailed {
            topic: message.topic().to_string(),
            cause: e.to_string(),
        })?;

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(|e| EventError::ConsumeFailed {
                topic: message.topic().to_string(),
                cause: e.to_string(),
            })?;

        Ok(())
    }
}
