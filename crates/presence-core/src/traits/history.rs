//! History API port
//!
//! The external message-history service, used only to recover events missed
//! during a detected sequence gap.

use async_trait::async_trait;

use crate::events::ActivityEvent;
use crate::value_objects::TopicId;

/// Errors from the history collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryError {
    #[error("History request failed: {0}")]
    Request(String),

    #[error("History API returned status {0}")]
    Status(u16),

    #[error("Invalid history response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Events for `topic_id` with `seq > since`, ascending
    async fn events_since(
        &self,
        topic_id: &TopicId,
        since: u64,
    ) -> Result<Vec<ActivityEvent>, HistoryError>;
}
