//! Frame formats
//!
//! Client → server frames are tagged by `op`. Server → client text is either
//! a bare activity event (`{type, topicId, ...}`) or an `op`-tagged control
//! frame (`pong`, `error`).

use presence_core::{ActivityEvent, DomainError, TopicId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "topicId")]
        topic_id: TopicId,
    },
    Unsubscribe {
        #[serde(rename = "topicId")]
        topic_id: TopicId,
    },
    Publish {
        event: ActivityEvent,
    },
    Ping,
}

impl ClientFrame {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a client frame (used by in-process servers)
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Frames received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Event(ActivityEvent),
    Pong,
    Error { code: u16, reason: String },
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ControlFrame {
    Pong,
    Error {
        code: u16,
        #[serde(default)]
        reason: String,
    },
}

impl ServerFrame {
    /// Parse inbound text; anything that is neither a control frame nor a
    /// valid activity event is malformed
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DomainError::MalformedMessage(e.to_string()))?;

        if value.get("op").is_some() {
            let control: ControlFrame = serde_json::from_value(value)
                .map_err(|e| DomainError::MalformedMessage(e.to_string()))?;
            return Ok(match control {
                ControlFrame::Pong => Self::Pong,
                ControlFrame::Error { code, reason } => Self::Error { code, reason },
            });
        }

        let event: ActivityEvent = serde_json::from_value(value)
            .map_err(|e| DomainError::MalformedMessage(e.to_string()))?;
        event.validate()?;
        Ok(Self::Event(event))
    }

    /// Serialize a server frame (used by in-process servers)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Event(event) => event.to_json(),
            Self::Pong => Ok(r#"{"op":"pong"}"#.to_string()),
            Self::Error { code, reason } => serde_json::to_string(&serde_json::json!({
                "op": "error",
                "code": code,
                "reason": reason,
            })),
        }
    }
}
