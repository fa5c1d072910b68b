//! Test fixtures and data generators
//!
//! Provides reusable events and identifiers for integration tests.

use presence_core::{ActivityEvent, ActivityKind, TopicId, UserId, UserRef};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique test data
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Get a unique suffix for test data
pub fn unique_suffix() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A topic id no other test uses
pub fn unique_topic() -> TopicId {
    TopicId::new(format!("thread-{}", unique_suffix()))
}

/// The user every test client signs in as
pub fn local_user() -> UserRef {
    UserRef::new("me", "Me")
}

/// An event from another user, as the backend would relay it
pub fn remote_event(topic_id: &TopicId, kind: ActivityKind, user: &str, seq: u64) -> ActivityEvent {
    ActivityEvent::new(topic_id.clone(), kind, UserId::new(user), 0).with_seq(seq)
}

/// A remote `join` carrying display fields
pub fn remote_join(topic_id: &TopicId, user: &str, display_name: &str, seq: u64) -> ActivityEvent {
    remote_event(topic_id, ActivityKind::Join, user, seq).with_payload(json!({ "displayName": display_name }))
}

/// A remote chat message
pub fn remote_message(topic_id: &TopicId, user: &str, seq: u64) -> ActivityEvent {
    remote_event(topic_id, ActivityKind::Message, user, seq).with_payload(json!({ "content": format!("message {seq}") }))
}
