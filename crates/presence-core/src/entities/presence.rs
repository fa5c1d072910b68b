//! Presence entry - one user active in one topic

use serde::{Deserialize, Serialize};

use super::UserRef;
use crate::value_objects::{TopicId, UserId};

/// A user currently viewing or participating in a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub topic_id: TopicId,
    pub user: UserRef,
    /// Epoch milliseconds of first insertion
    pub joined_at: i64,
    /// Epoch milliseconds of the last join/heartbeat/activity
    pub last_seen_at: i64,
}

impl PresenceEntry {
    /// Create a new entry at `now`
    pub fn new(topic_id: TopicId, user: UserRef, now: i64) -> Self {
        Self {
            topic_id,
            user,
            joined_at: now,
            last_seen_at: now,
        }
    }

    #[inline]
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// Refresh `last_seen_at`, never moving it backwards
    pub fn touch(&mut self, now: i64) {
        self.last_seen_at = self.last_seen_at.max(now);
    }

    /// Whether the entry has been silent for longer than `timeout_ms`
    #[inline]
    pub fn is_stale(&self, now: i64, timeout_ms: i64) -> bool {
        now - self.last_seen_at > timeout_ms
    }
}
