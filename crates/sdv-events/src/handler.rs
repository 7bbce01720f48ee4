//! The event-handler seam between the bus adapter and downstream services.

use crate::envelope::DomainEvent;
use async_trait::async_trait;

/// Trait for handling consumed domain events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle an event.
    ///
    /// Return Ok(()) once the event has been durably recorded downstream;
    /// only then is the bus offset committed. An Err leaves the offset
    /// uncommitted so the message is redelivered.
    async fn handle(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
