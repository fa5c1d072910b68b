//! Reaction board - one reaction per user per message, toggled on repeat

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::value_objects::UserId;

/// Outcome of applying a reaction to the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    /// User had no reaction on the message
    Added { emoji: String },
    /// User clicked the emoji they already had
    Removed { emoji: String },
    /// User switched to a different emoji
    Replaced { previous: String, emoji: String },
}

/// Aggregated reaction count for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
    pub me: bool,
}

/// Per-topic reaction state keyed by message id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionBoard {
    messages: HashMap<String, HashMap<UserId, String>>,
}

impl ReactionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a reaction click from `user_id`
    pub fn toggle(&mut self, message_id: &str, user_id: &UserId, emoji: &str) -> ReactionChange {
        let reactions = self.messages.entry(message_id.to_string()).or_default();

        let change = match reactions.get(user_id) {
            Some(current) if current == emoji => {
                reactions.remove(user_id);
                ReactionChange::Removed {
                    emoji: emoji.to_string(),
                }
            }
            Some(current) => {
                let previous = current.clone();
                reactions.insert(user_id.clone(), emoji.to_string());
                ReactionChange::Replaced {
                    previous,
                    emoji: emoji.to_string(),
                }
            }
            None => {
                reactions.insert(user_id.clone(), emoji.to_string());
                ReactionChange::Added {
                    emoji: emoji.to_string(),
                }
            }
        };

        if reactions.is_empty() {
            self.messages.remove(message_id);
        }

        change
    }

    /// Current emoji of a user on a message
    pub fn reaction_of(&self, message_id: &str, user_id: &UserId) -> Option<&str> {
        self.messages
            .get(message_id)
            .and_then(|r| r.get(user_id))
            .map(String::as_str)
    }

    /// Counts per emoji for a message, most used first
    pub fn counts(&self, message_id: &str, me: Option<&UserId>) -> Vec<ReactionCount> {
        let Some(reactions) = self.messages.get(message_id) else {
            return Vec::new();
        };

        let mut grouped: BTreeMap<&str, ReactionCount> = BTreeMap::new();
        for (user_id, emoji) in reactions {
            let entry = grouped.entry(emoji.as_str()).or_insert_with(|| ReactionCount {
                emoji: emoji.clone(),
                count: 0,
                me: false,
            });
            entry.count += 1;
            entry.me |= me == Some(user_id);
        }

        let mut counts: Vec<ReactionCount> = grouped.into_values().collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.emoji.cmp(&b.emoji)));
        counts
    }

    /// Message ids that currently carry reactions
    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
