//! Reactive per-topic snapshot

use presence_common::ErrorReport;
use presence_core::{PresenceEntry, ReactionCount, TopicId, UserId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything a UI needs to render one topic
///
/// Published through a `tokio::sync::watch` channel whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicView {
    pub topic_id: TopicId,
    /// Ordered by `joined_at`
    pub presence: Vec<PresenceEntry>,
    /// Ordered by typing start; includes the local user
    pub typing_users: Vec<UserId>,
    /// Reaction counts keyed by message id
    pub reactions: BTreeMap<String, Vec<ReactionCount>>,
    /// A gap is being recovered from history
    pub resyncing: bool,
    /// Last delivered sequence number
    pub last_seq: Option<u64>,
    pub last_error: Option<ErrorReport>,
}

impl TopicView {
    pub fn empty(topic_id: TopicId) -> Self {
        Self {
            topic_id,
            presence: Vec::new(),
            typing_users: Vec::new(),
            reactions: BTreeMap::new(),
            resyncing: false,
            last_seq: None,
            last_error: None,
        }
    }

    /// Typing users other than `me`
    pub fn typing_users_except(&self, me: &UserId) -> Vec<UserId> {
        self.typing_users
            .iter()
            .filter(|user_id| *user_id != me)
            .cloned()
            .collect()
    }

    pub fn is_present(&self, user_id: &UserId) -> bool {
        self.presence.iter().any(|entry| entry.user_id() == user_id)
    }
}
