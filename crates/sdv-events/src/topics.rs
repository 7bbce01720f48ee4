//! Topic table for the console event bus.
//!
//! One durable topic per domain, each paired with a dead-letter topic for
//! messages that cannot be parsed. Message expiry on the primary topics is
//! broker-side retention, configured out of band.

/// The per-domain event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Scenario,
    Track,
    Simulation,
    Webhook,
}

impl EventTopic {
    /// All domain topics, in consumption order.
    pub const ALL: [EventTopic; 4] = [
        EventTopic::Scenario,
        EventTopic::Track,
        EventTopic::Simulation,
        EventTopic::Webhook,
    ];

    /// The primary topic name.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Scenario => "sdv.scenario.events",
            Self::Track => "sdv.track.events",
            Self::Simulation => "sdv.simulation.events",
            Self::Webhook => "sdv.webhook.events",
        }
    }

    /// The paired dead-letter topic name.
    #[must_use]
    pub fn dlq_topic(&self) -> &'static str {
        match self {
            Self::Scenario => "sdv.scenario.events.dlq",
            Self::Track => "sdv.track.events.dlq",
            Self::Simulation => "sdv.simulation.events.dlq",
            Self::Webhook => "sdv.webhook.events.dlq",
        }
    }

    /// The routing-key domain this topic carries.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Scenario => "scenario",
            Self::Track => "track",
            Self::Simulation => "simulation",
            Self::Webhook => "webhook",
        }
    }

    /// The routing-key pattern bound to this topic.
    #[must_use]
    pub fn routing_pattern(&self) -> &'static str {
        match self {
            Self::Scenario => "scenario.*",
            Self::Track => "track.*",
            Self::Simulation => "simulation.*",
            Self::Webhook => "webhook.*",
        }
    }

    /// Find the topic an event type routes to, by its domain prefix.
    #[must_use]
    pub fn for_event_type(event_type: &str) -> Option<Self> {
        let domain = event_type
            .split_once('.')
            .map_or(event_type, |(domain, _)| domain);
        Self::ALL.into_iter().find(|t| t.domain() == domain)
    }

    /// Find the topic by its primary topic name.
    #[must_use]
    pub fn for_topic_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.topic() == name)
    }
}
