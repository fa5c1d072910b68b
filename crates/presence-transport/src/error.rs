//! Transport errors

use crate::protocol::{is_fatal_close, CloseCode};
use presence_common::AppError;

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Network-level failure while connecting (refused, DNS, TLS, reset)
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Handshake rejected by the server with an HTTP status
    #[error("Connection rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// Link closed by the peer
    #[error("Connection closed ({code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// Invalid URL or frames the server refused
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport shut down")]
    Shutdown,

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

impl TransportError {
    /// Protocol/auth errors (4xx-equivalent); these are never retried
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => (400..500).contains(status) && *status != 408 && *status != 429,
            Self::Closed { code: Some(code), .. } => is_fatal_close(*code),
            Self::Protocol(_) => true,
            _ => false,
        }
    }

    /// Failures the reconnect loop recovers from
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !self.is_fatal() && !matches!(self, Self::Shutdown | Self::Encode(_))
    }

    /// Build a close error from a backend close code
    #[must_use]
    pub fn closed_with(code: CloseCode) -> Self {
        Self::Closed {
            code: Some(code.as_u16()),
            reason: code.description().to_string(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => AppError::NotConnected,
            TransportError::Rejected { status: 401 | 403, reason } => AppError::Unauthorized(reason),
            TransportError::Closed {
                code: Some(code), ..
            } if matches!(
                CloseCode::from_u16(code),
                Some(
                    CloseCode::NotAuthenticated
                        | CloseCode::AuthenticationFailed
                        | CloseCode::Forbidden
                )
            ) =>
            {
                AppError::Unauthorized(err.to_string())
            }
            ref e if e.is_fatal() => AppError::Protocol(e.to_string()),
            TransportError::Shutdown | TransportError::Encode(_) => AppError::internal(err),
            e => AppError::Connection(e.to_string()),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
