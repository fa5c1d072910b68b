//! Outbound typing coalescing
//!
//! Local state updates on every keystroke, but the network sees at most one
//! `typingStart` per window. While the user keeps typing past a window the
//! next keystroke sends another start so remote expiry timers stay armed.

use presence_core::TopicId;
use std::collections::HashMap;

#[derive(Debug)]
pub struct TypingDebouncer {
    window_ms: i64,
    last_sent: HashMap<TopicId, i64>,
}

impl TypingDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            last_sent: HashMap::new(),
        }
    }

    /// Whether a keystroke at `now` should go out as `typingStart`
    pub fn should_send(&mut self, topic_id: &TopicId, now: i64) -> bool {
        match self.last_sent.get(topic_id) {
            Some(&sent) if now - sent < self.window_ms => false,
            _ => {
                self.last_sent.insert(topic_id.clone(), now);
                true
            }
        }
    }

    /// Typing ended; the next keystroke sends immediately
    pub fn reset(&mut self, topic_id: &TopicId) {
        self.last_sent.remove(topic_id);
    }
}
