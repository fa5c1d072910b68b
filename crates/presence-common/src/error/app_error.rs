//! Application error types
//!
//! Unified error type surfaced by the client facade. Transport and history
//! failures are carried as strings so this crate stays below the transport
//! layer in the dependency graph.

use presence_core::{DomainError, HistoryError};
use serde::Serialize;
use std::fmt;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Transient network errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected")]
    NotConnected,

    // Fatal errors (no automatic retry)
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Resync collaborator
    #[error(transparent)]
    History(#[from] HistoryError),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    /// Get error code for diagnostics and the facade's error signal
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::History(_) => "HISTORY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Domain(e) => e.code(),
        }
    }

    /// Transient failures that backoff/resync will recover from
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::History(_)
        )
    }

    /// Failures that require the caller to re-authenticate and reconnect
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Unauthorized(_))
    }

    /// Create a connection error
    #[must_use]
    pub fn connection(msg: impl fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Snapshot of an error for UI consumption (the `lastError` signal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Epoch milliseconds when the error was recorded
    pub at: i64,
}

impl ErrorReport {
    /// Record `err` as of `at`
    pub fn new(err: &AppError, at: i64) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            at,
        }
    }
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        Self::new(err, chrono::Utc::now().timestamp_millis())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
