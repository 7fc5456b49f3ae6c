//! # Error Types
//!
//! Error handling for the protocol core.
//!
//! Two things live here: [`ProtocolError`], the Rust-side error returned by
//! every fallible operation in the crate, and [`ErrorCode`], the closed,
//! wire-visible enumeration carried inside error responses and disconnect
//! notices so the peer can decide what to do next.
//!
//! ## Error Categories
//! - **Framing**: bad length header, truncated frame. Fatal to the connection.
//! - **Deserialization**: malformed body. Counted; fatal only past a threshold.
//! - **Handler**: application logic failed. Answered with `InternalError`.
//! - **Rate limit**: budget exceeded. Fatal to the connection.
//! - **Authentication**: answered with a typed error response.
//! - **Transport**: socket reset, closed stream. Fatal to the connection.
//!
//! ## Example Usage
//! ```rust
//! use arena_protocol::error::{ErrorCode, ProtocolError, Result};
//!
//! fn check_budget(used: u32, limit: u32) -> Result<()> {
//!     if used > limit {
//!         return Err(ProtocolError::RateLimited(format!("{used}/{limit}")));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_budget(3, 5).is_ok());
//! assert!(!ErrorCode::Forbidden.allows_reconnect());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection teardown reasons
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_REMOTE_CLOSED: &str = "Remote host closed the connection";
    pub const ERR_CONNECTION_TIMEOUT: &str = "Connection timed out (no activity)";
    pub const ERR_TOO_MANY_MALFORMED: &str = "Too many malformed packets";
    pub const ERR_RATE_LIMITED: &str = "Rate limit exceeded";
    pub const ERR_SERVER_FULL: &str = "Server is full";
    pub const ERR_SERVER_SHUTDOWN: &str = "Server shutting down";

    /// Intentional local disconnects (never trigger automatic reconnection)
    pub const REASON_USER_DISCONNECTED: &str = "User disconnected";
    pub const REASON_MODULE_UNLOADING: &str = "Module unloading";

    /// Response messages
    pub const ERR_AUTH_REQUIRED: &str = "Authentication required";
    pub const ERR_INVALID_CREDENTIALS: &str = "Invalid username or password";
    pub const ERR_SESSION_EXPIRED: &str = "Session expired or not found";
    pub const ERR_UNSUPPORTED_PACKET: &str = "No handler registered for packet type";
    pub const ERR_INVALID_PACKET: &str = "Invalid packet";
    pub const ERR_INTERNAL: &str = "Internal server error";
}

/// Machine-readable error kinds shared by client and server.
///
/// This is the one canonical taxonomy: it appears in `ResponseStatus`,
/// in `Disconnect` packets and in local [`DisconnectInfo`](crate::transport::connection::DisconnectInfo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    InvalidPacket = 1,
    MalformedPacket = 2,
    UnsupportedPacket = 3,
    VersionMismatch = 4,
    AuthenticationRequired = 10,
    InvalidCredentials = 11,
    SessionExpired = 12,
    Forbidden = 13,
    RateLimited = 20,
    Timeout = 21,
    ServerFull = 30,
    ServerMaintenance = 31,
    InternalError = 40,
}

impl ErrorCode {
    /// Whether a peer disconnected with this code may reconnect automatically.
    ///
    /// Transient conditions (maintenance, rate limiting, timeouts, a full
    /// server) allow it; anything that says "you are not welcome" or "your
    /// stream is broken" does not.
    pub fn allows_reconnect(self) -> bool {
        match self {
            ErrorCode::Forbidden
            | ErrorCode::MalformedPacket
            | ErrorCode::InvalidCredentials
            | ErrorCode::VersionMismatch => false,
            ErrorCode::Unknown
            | ErrorCode::InvalidPacket
            | ErrorCode::UnsupportedPacket
            | ErrorCode::AuthenticationRequired
            | ErrorCode::SessionExpired
            | ErrorCode::RateLimited
            | ErrorCode::Timeout
            | ErrorCode::ServerFull
            | ErrorCode::ServerMaintenance
            | ErrorCode::InternalError => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "Unknown",
            ErrorCode::InvalidPacket => "InvalidPacket",
            ErrorCode::MalformedPacket => "MalformedPacket",
            ErrorCode::UnsupportedPacket => "UnsupportedPacket",
            ErrorCode::VersionMismatch => "VersionMismatch",
            ErrorCode::AuthenticationRequired => "AuthenticationRequired",
            ErrorCode::InvalidCredentials => "InvalidCredentials",
            ErrorCode::SessionExpired => "SessionExpired",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::ServerFull => "ServerFull",
            ErrorCode::ServerMaintenance => "ServerMaintenance",
            ErrorCode::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(i64),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Request requires a non-zero correlation id")]
    MissingCorrelationId,

    #[error("Correlation id {0} already has an outstanding request")]
    DuplicateCorrelationId(u32),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Reconnection failed after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Errors after which the byte stream can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::NotConnected
        )
    }

    /// The wire code a peer should see for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtocolError::DeserializeError(_) => ErrorCode::MalformedPacket,
            ProtocolError::InvalidFrameLength(_) | ProtocolError::OversizedPacket(_) => {
                ErrorCode::InvalidPacket
            }
            ProtocolError::UnexpectedMessage => ErrorCode::UnsupportedPacket,
            ProtocolError::Timeout => ErrorCode::Timeout,
            ProtocolError::RateLimited(_) => ErrorCode::RateLimited,
            ProtocolError::AuthenticationFailed(_) => ErrorCode::InvalidCredentials,
            ProtocolError::SessionError(_) => ErrorCode::SessionExpired,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::DeserializeError(err.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_hint_matches_code_class() {
        assert!(ErrorCode::ServerMaintenance.allows_reconnect());
        assert!(ErrorCode::RateLimited.allows_reconnect());
        assert!(ErrorCode::Timeout.allows_reconnect());
        assert!(!ErrorCode::Forbidden.allows_reconnect());
        assert!(!ErrorCode::MalformedPacket.allows_reconnect());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::InvalidFrameLength(-1).is_fatal_to_connection());
        assert!(ProtocolError::ConnectionClosed.is_fatal_to_connection());
        assert!(!ProtocolError::DeserializeError("bad".into()).is_fatal_to_connection());
        assert!(!ProtocolError::OversizedPacket(10).is_fatal_to_connection());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::DuplicateCorrelationId(7);
        assert_eq!(
            err.to_string(),
            "Correlation id 7 already has an outstanding request"
        );
        assert_eq!(ErrorCode::RateLimited.to_string(), "RateLimited");
    }
}
