//! Typing-indicator state machine
//!
//! Each (topic, user) pair is either idle (absent) or typing (present with an
//! expiry). Only the idle → typing transition reports a start; repeated starts
//! push the expiry out. Stop, expiry and message send all land back in idle
//! and are indistinguishable to observers.

use presence_core::{TopicId, TypingState, UserId};
use std::collections::HashMap;

#[derive(Debug)]
pub struct TypingMachine {
    timeout_ms: i64,
    topics: HashMap<TopicId, HashMap<UserId, TypingState>>,
}

impl TypingMachine {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: i64::try_from(timeout_ms).unwrap_or(i64::MAX),
            topics: HashMap::new(),
        }
    }

    /// Returns `true` on the idle → typing transition
    pub fn start(&mut self, topic_id: &TopicId, user_id: &UserId, now: i64) -> bool {
        let users = self.topics.entry(topic_id.clone()).or_default();
        match users.get_mut(user_id) {
            Some(state) => {
                state.extend(now, self.timeout_ms);
                false
            }
            None => {
                users.insert(
                    user_id.clone(),
                    TypingState::new(topic_id.clone(), user_id.clone(), now, self.timeout_ms),
                );
                true
            }
        }
    }

    /// Returns `true` when the user was typing
    pub fn stop(&mut self, topic_id: &TopicId, user_id: &UserId) -> bool {
        let Some(users) = self.topics.get_mut(topic_id) else {
            return false;
        };
        let removed = users.remove(user_id).is_some();
        if users.is_empty() {
            self.topics.remove(topic_id);
        }
        removed
    }

    /// Move every entry with `now >= expires_at` back to idle
    pub fn expire(&mut self, now: i64) -> Vec<TypingState> {
        let mut expired = Vec::new();

        self.topics.retain(|_, users| {
            users.retain(|_, state| {
                if state.is_expired(now) {
                    expired.push(state.clone());
                    false
                } else {
                    true
                }
            });
            !users.is_empty()
        });

        expired.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        expired
    }

    pub fn is_typing(&self, topic_id: &TopicId, user_id: &UserId) -> bool {
        self.topics
            .get(topic_id)
            .is_some_and(|users| users.contains_key(user_id))
    }

    /// Users typing in `topic_id`, in the order they started
    pub fn typing_users(&self, topic_id: &TopicId) -> Vec<UserId> {
        let Some(users) = self.topics.get(topic_id) else {
            return Vec::new();
        };
        let mut states: Vec<&TypingState> = users.values().collect();
        states.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        states.into_iter().map(|s| s.user_id.clone()).collect()
    }

    pub fn forget_topic(&mut self, topic_id: &TopicId) {
        self.topics.remove(topic_id);
    }
}
