//! Activity event and its JSON wire shape
//!
//! The same shape travels in both directions over the transport:
//! `{type, topicId, userId, timestamp, seq, payload?}`. An `id` is carried when
//! present and generated otherwise, so echoes of locally published events can
//! be recognised.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::entities::UserRef;
use crate::error::DomainError;
use crate::value_objects::{TopicId, UserId};

/// Kind of activity carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Message,
    Reaction,
    Join,
    Leave,
    TypingStart,
    TypingStop,
}

impl ActivityKind {
    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Reaction => "reaction",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::TypingStart => "typingStart",
            Self::TypingStop => "typingStop",
        }
    }

    /// Join/leave events
    #[must_use]
    pub const fn is_presence(self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }

    /// Typing start/stop events
    #[must_use]
    pub const fn is_typing(self) -> bool {
        matches!(self, Self::TypingStart | Self::TypingStop)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `reaction` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    pub emoji: String,
}

/// Structured activity event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub topic_id: TopicId,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub user_id: UserId,
    /// Epoch milliseconds at the sender
    pub timestamp: i64,
    /// Per-topic sequence number from the sender's perspective
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ActivityEvent {
    /// Create a new event with a fresh id and `seq = 0`
    pub fn new(topic_id: TopicId, kind: ActivityKind, user_id: UserId, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic_id,
            kind,
            user_id,
            timestamp,
            seq: 0,
            payload: None,
        }
    }

    /// Set the sequence number
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Attach a payload
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse and validate an inbound wire message
    pub fn from_json(text: &str) -> Result<Self, DomainError> {
        let event: Self =
            serde_json::from_str(text).map_err(|e| DomainError::MalformedMessage(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Serialize to the wire shape
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Reject events that cannot be routed or attributed
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.topic_id.is_empty() {
            return Err(DomainError::EmptyTopicId);
        }
        if self.user_id.is_empty() {
            return Err(DomainError::EmptyUserId);
        }
        if self.kind == ActivityKind::Reaction && self.reaction().is_none() {
            return Err(DomainError::MalformedMessage(
                "reaction event without messageId/emoji payload".to_string(),
            ));
        }
        Ok(())
    }

    /// Reaction payload, if this is a well-formed reaction event
    pub fn reaction(&self) -> Option<ReactionPayload> {
        if self.kind != ActivityKind::Reaction {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }

    /// The joining user's display fields, falling back to the bare id
    pub fn user_ref(&self) -> UserRef {
        let Some(payload) = self.payload.as_ref() else {
            return UserRef::anonymous(self.user_id.clone());
        };

        let display_name = payload
            .get("displayName")
            .and_then(Value::as_str)
            .map_or_else(|| self.user_id.to_string(), String::from);
        let avatar_ref = payload
            .get("avatarRef")
            .and_then(Value::as_str)
            .map(String::from);

        UserRef {
            id: self.user_id.clone(),
            display_name,
            avatar_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_inbound_message() {
        let text = r#"{"type":"typingStart","topicId":"thread-1","userId":42,"timestamp":1700000000000,"seq":7}"#;
        let event = ActivityEvent::from_json(text).unwrap();

        assert_eq!(event.kind, ActivityKind::TypingStart);
        assert_eq!(event.topic_id.as_str(), "thread-1");
        assert_eq!(event.user_id.as_str(), "42");
        assert_eq!(event.seq, 7);
        assert!(event.payload.is_none());
    }

    #[test]
    fn test_parse_keeps_id_when_present() {
        let id = Uuid::new_v4();
        let text = json!({
            "id": id,
            "type": "message",
            "topicId": "t",
            "userId": "u",
            "timestamp": 1,
            "seq": 1,
            "payload": {"content": "hi"}
        })
        .to_string();

        let event = ActivityEvent::from_json(&text).unwrap();
        assert_eq!(event.id, id);
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        assert!(matches!(
            ActivityEvent::from_json("not json"),
            Err(DomainError::MalformedMessage(_))
        ));
        assert!(matches!(
            ActivityEvent::from_json(r#"{"type":"wave","topicId":"t","userId":"u","timestamp":1,"seq":1}"#),
            Err(DomainError::MalformedMessage(_))
        ));
        assert!(matches!(
            ActivityEvent::from_json(r#"{"type":"join","topicId":"","userId":"u","timestamp":1,"seq":1}"#),
            Err(DomainError::EmptyTopicId)
        ));
        assert!(matches!(
            ActivityEvent::from_json(r#"{"type":"reaction","topicId":"t","userId":"u","timestamp":1,"seq":1}"#),
            Err(DomainError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_wire_shape() {
        let event = ActivityEvent::new(
            TopicId::new("t"),
            ActivityKind::TypingStop,
            UserId::new("u"),
            5,
        )
        .with_seq(3);

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "typingStop");
        assert_eq!(value["topicId"], "t");
        assert_eq!(value["userId"], "u");
        assert_eq!(value["seq"], 3);
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_reaction_payload() {
        let event = ActivityEvent::new(TopicId::new("t"), ActivityKind::Reaction, UserId::new("u"), 0)
            .with_payload(json!({"messageId": "m1", "emoji": "👍"}));

        let reaction = event.reaction().unwrap();
        assert_eq!(reaction.message_id, "m1");
        assert_eq!(reaction.emoji, "👍");
    }

    #[test]
    fn test_user_ref_from_join_payload() {
        let event = ActivityEvent::new(TopicId::new("t"), ActivityKind::Join, UserId::new("u1"), 0)
            .with_payload(json!({"displayName": "Ada", "avatarRef": "a.png"}));
        let user = event.user_ref();
        assert_eq!(user.display_name, "Ada");
        assert_eq!(user.avatar_ref.as_deref(), Some("a.png"));

        let bare = ActivityEvent::new(TopicId::new("t"), ActivityKind::Join, UserId::new("u2"), 0);
        assert_eq!(bare.user_ref().display_name, "u2");
    }

    #[test]
    fn test_kind_helpers() {
        assert!(ActivityKind::Join.is_presence());
        assert!(ActivityKind::TypingStop.is_typing());
        assert!(!ActivityKind::Message.is_presence());
        assert_eq!(ActivityKind::TypingStart.to_string(), "typingStart");
    }
}
