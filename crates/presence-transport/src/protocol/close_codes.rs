//! WebSocket close codes
//!
//! Application close codes in the 4000 range sent by the real-time backend,
//! plus the classification of standard RFC 6455 codes.

use serde::{Deserialize, Serialize};

/// Backend WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid control frame sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding (JSON decode error)
    DecodeError = 4002,
    /// Sent frames before authenticating
    NotAuthenticated = 4003,
    /// Invalid or expired token
    AuthenticationFailed = 4004,
    /// Authenticated user may not access a requested topic
    Forbidden = 4005,
    /// Too many requests (rate limited)
    RateLimited = 4008,
    /// Session has timed out
    SessionTimeout = 4009,
    /// Backend is restarting or draining connections
    ServerRestart = 4010,
    /// Invalid/outdated protocol version
    InvalidApiVersion = 4012,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::Forbidden),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::ServerRestart),
            4012 => Some(Self::InvalidApiVersion),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Protocol and auth failures; the client must not retry on its own
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode
                | Self::DecodeError
                | Self::NotAuthenticated
                | Self::AuthenticationFailed
                | Self::Forbidden
                | Self::InvalidApiVersion
        )
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid control frame",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::Forbidden => "Access to topic denied",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::ServerRestart => "Server restarting",
            Self::InvalidApiVersion => "Invalid API version",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({}): {}", self, self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Whether a raw close code means "do not reconnect"
///
/// Application codes follow [`CloseCode::is_fatal`]. Of the standard codes,
/// protocol error (1002), unsupported data (1003), invalid payload (1007) and
/// policy violation (1008) are fatal; everything else, including abnormal
/// closure, is treated as a transient network loss.
#[must_use]
pub fn is_fatal_close(code: u16) -> bool {
    match CloseCode::from_u16(code) {
        Some(code) => code.is_fatal(),
        None => matches!(code, 1002 | 1003 | 1007 | 1008),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(4000), Some(CloseCode::UnknownError));
        assert_eq!(CloseCode::from_u16(4004), Some(CloseCode::AuthenticationFailed));
        assert_eq!(CloseCode::from_u16(1000), None);
        assert_eq!(CloseCode::from_u16(4006), None);
    }

    #[test]
    fn test_is_fatal() {
        assert!(CloseCode::AuthenticationFailed.is_fatal());
        assert!(CloseCode::Forbidden.is_fatal());
        assert!(CloseCode::DecodeError.is_fatal());

        assert!(!CloseCode::UnknownError.is_fatal());
        assert!(!CloseCode::RateLimited.is_fatal());
        assert!(!CloseCode::ServerRestart.is_fatal());
    }

    #[test]
    fn test_is_fatal_close_raw() {
        assert!(is_fatal_close(4004));
        assert!(is_fatal_close(1008));
        assert!(!is_fatal_close(1000));
        assert!(!is_fatal_close(1006));
        assert!(!is_fatal_close(4009));
        assert!(!is_fatal_close(4999));
    }

    #[test]
    fn test_close_code_display() {
        let display = CloseCode::AuthenticationFailed.to_string();
        assert!(display.contains("4004"));
        assert!(display.contains("Authentication"));
    }
}
