//! Typing state - a user currently typing in a topic

use serde::{Deserialize, Serialize};

use crate::value_objects::{TopicId, UserId};

/// Active typing indicator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    pub topic_id: TopicId,
    pub user_id: UserId,
    pub started_at: i64,
    pub expires_at: i64,
}

impl TypingState {
    /// Start typing at `now`, expiring after `timeout_ms`
    pub fn new(topic_id: TopicId, user_id: UserId, now: i64, timeout_ms: i64) -> Self {
        Self {
            topic_id,
            user_id,
            started_at: now,
            expires_at: now + timeout_ms,
        }
    }

    /// Push the expiry out to `now + timeout_ms`
    pub fn extend(&mut self, now: i64, timeout_ms: i64) {
        self.expires_at = self.expires_at.max(now + timeout_ms);
    }

    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}
