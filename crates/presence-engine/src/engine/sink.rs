//! Outbound seam

use presence_core::{ActivityEvent, TopicId};
use presence_transport::{Transport, TransportError};

/// Where the engine publishes locally originated events
///
/// Publishing is fire-and-forget: a failure is logged and never retried.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, topic_id: &TopicId, event: ActivityEvent) -> Result<(), TransportError>;
}

impl EventSink for Transport {
    fn publish(&self, topic_id: &TopicId, event: ActivityEvent) -> Result<(), TransportError> {
        self.send(topic_id, event)
    }
}
