//! Domain errors - error types for the domain layer

use thiserror::Error;

/// Domain layer errors
#[derive(Debug, Error)]
pub enum DomainError {
    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Topic id must not be empty")]
    EmptyTopicId,

    #[error("User id must not be empty")]
    EmptyUserId,

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("Topic not subscribed: {0}")]
    TopicNotSubscribed(String),

    #[error("Engine is shut down")]
    EngineStopped,
}

impl DomainError {
    /// Get error code for diagnostics
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::EmptyTopicId => "EMPTY_TOPIC_ID",
            Self::EmptyUserId => "EMPTY_USER_ID",
            Self::TopicNotSubscribed(_) => "TOPIC_NOT_SUBSCRIBED",
            Self::EngineStopped => "ENGINE_STOPPED",
        }
    }

    /// Check if this error came from an invalid inbound message
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage(_) | Self::EmptyTopicId | Self::EmptyUserId
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DomainError::EmptyTopicId.code(), "EMPTY_TOPIC_ID");
        assert_eq!(
            DomainError::MalformedMessage("x".to_string()).code(),
            "MALFORMED_MESSAGE"
        );
    }

    #[test]
    fn test_is_protocol() {
        assert!(DomainError::EmptyUserId.is_protocol());
        assert!(!DomainError::EngineStopped.is_protocol());
    }

    #[test]
    fn test_error_display() {
        let err = DomainError::TopicNotSubscribed("thread-1".to_string());
        assert_eq!(err.to_string(), "Topic not subscribed: thread-1");
    }
}
