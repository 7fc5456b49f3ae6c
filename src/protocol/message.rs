//! # Packet Envelope
//!
//! Every frame body carries one [`Packet`]: a small header (timestamp,
//! protocol version, optional correlation id) plus a typed [`Payload`].
//! The [`PacketType`] tag is derived from the payload variant, so a packet
//! can never claim to be something it is not.
//!
//! Response payloads embed a [`ResponseStatus`]. A failed response must carry
//! both an [`ErrorCode`] and a message; a successful one must satisfy the
//! invariant of its own kind (a login response must hand out a token, ...).
//!
//! Application packets beyond the protocol's own (login, reconnect,
//! heartbeat, disconnect) are opaque to this crate; `ChatMessage` is the one
//! example kept in the catalog.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::config::PROTOCOL_VERSION;
use crate::error::ErrorCode;
use crate::utils::time::{current_timestamp_ms, verify_timestamp};
use crate::utils::timeout::MAX_CLOCK_SKEW;

/// Closed enumeration of packet kinds.
///
/// The discriminant is the wire tag: bodies carry it as a `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum PacketType {
    Heartbeat = 1,
    HeartbeatAck = 2,
    Disconnect = 3,
    LoginRequest = 10,
    LoginResponse = 11,
    LogoutRequest = 12,
    LogoutResponse = 13,
    ReconnectRequest = 14,
    ReconnectResponse = 15,
    ErrorResponse = 20,
    ChatMessage = 100,
}

impl PacketType {
    pub const ALL: [PacketType; 11] = [
        PacketType::Heartbeat,
        PacketType::HeartbeatAck,
        PacketType::Disconnect,
        PacketType::LoginRequest,
        PacketType::LoginResponse,
        PacketType::LogoutRequest,
        PacketType::LogoutResponse,
        PacketType::ReconnectRequest,
        PacketType::ReconnectResponse,
        PacketType::ErrorResponse,
        PacketType::ChatMessage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Heartbeat => "Heartbeat",
            PacketType::HeartbeatAck => "HeartbeatAck",
            PacketType::Disconnect => "Disconnect",
            PacketType::LoginRequest => "LoginRequest",
            PacketType::LoginResponse => "LoginResponse",
            PacketType::LogoutRequest => "LogoutRequest",
            PacketType::LogoutResponse => "LogoutResponse",
            PacketType::ReconnectRequest => "ReconnectRequest",
            PacketType::ReconnectResponse => "ReconnectResponse",
            PacketType::ErrorResponse => "ErrorResponse",
            PacketType::ChatMessage => "ChatMessage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Reply kind a correlated request of this type waits for, if fixed.
    pub fn expected_response(self) -> Option<PacketType> {
        match self {
            PacketType::Heartbeat => Some(PacketType::HeartbeatAck),
            PacketType::LoginRequest => Some(PacketType::LoginResponse),
            PacketType::LogoutRequest => Some(PacketType::LogoutResponse),
            PacketType::ReconnectRequest => Some(PacketType::ReconnectResponse),
            _ => None,
        }
    }

    /// Whether packets of this kind carry a [`ResponseStatus`].
    pub fn is_response(self) -> bool {
        matches!(
            self,
            PacketType::LoginResponse
                | PacketType::LogoutResponse
                | PacketType::ReconnectResponse
                | PacketType::ErrorResponse
        )
    }
}

impl Serialize for PacketType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for PacketType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u16::deserialize(deserializer)?;
        PacketType::from_code(code).ok_or_else(|| {
            serde::de::Error::custom(format_args!("unknown packet type tag {code}"))
        })
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome fields shared by every response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    pub message: Option<String>,
}

impl ResponseStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: None,
            message: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            message: Some(message.into()),
        }
    }

    /// A failure needs a populated error pair; success is checked by the payload.
    fn failure_is_complete(&self) -> bool {
        self.error_code.is_some() && self.message.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// Typed packet bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Heartbeat {
        client_time_ms: u64,
    },
    HeartbeatAck {
        server_time_ms: u64,
    },
    Disconnect {
        reason: String,
        error_code: Option<ErrorCode>,
        reconnect_allowed: bool,
    },
    LoginRequest {
        username: String,
        password: String,
    },
    LoginResponse {
        status: ResponseStatus,
        session_token: Option<String>,
        player_id: u64,
    },
    LogoutRequest,
    LogoutResponse {
        status: ResponseStatus,
    },
    ReconnectRequest {
        session_token: String,
    },
    ReconnectResponse {
        status: ResponseStatus,
        player_id: u64,
    },
    ErrorResponse {
        status: ResponseStatus,
    },
    ChatMessage {
        sender: String,
        text: String,
    },
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Heartbeat { .. } => PacketType::Heartbeat,
            Payload::HeartbeatAck { .. } => PacketType::HeartbeatAck,
            Payload::Disconnect { .. } => PacketType::Disconnect,
            Payload::LoginRequest { .. } => PacketType::LoginRequest,
            Payload::LoginResponse { .. } => PacketType::LoginResponse,
            Payload::LogoutRequest => PacketType::LogoutRequest,
            Payload::LogoutResponse { .. } => PacketType::LogoutResponse,
            Payload::ReconnectRequest { .. } => PacketType::ReconnectRequest,
            Payload::ReconnectResponse { .. } => PacketType::ReconnectResponse,
            Payload::ErrorResponse { .. } => PacketType::ErrorResponse,
            Payload::ChatMessage { .. } => PacketType::ChatMessage,
        }
    }

    pub fn status(&self) -> Option<&ResponseStatus> {
        match self {
            Payload::LoginResponse { status, .. }
            | Payload::LogoutResponse { status }
            | Payload::ReconnectResponse { status, .. }
            | Payload::ErrorResponse { status } => Some(status),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        if let Some(status) = self.status() {
            if !status.success {
                return status.failure_is_complete();
            }
        }

        match self {
            Payload::LoginRequest { username, password } => {
                !username.is_empty() && !password.is_empty()
            }
            Payload::LoginResponse {
                session_token,
                player_id,
                ..
            } => session_token.as_deref().is_some_and(|t| !t.is_empty()) && *player_id != 0,
            Payload::ReconnectRequest { session_token } => !session_token.is_empty(),
            Payload::ReconnectResponse { player_id, .. } => *player_id != 0,
            // An error response that claims success is a contradiction.
            Payload::ErrorResponse { .. } => false,
            Payload::ChatMessage { text, .. } => !text.is_empty(),
            Payload::Heartbeat { .. }
            | Payload::HeartbeatAck { .. }
            | Payload::Disconnect { .. }
            | Payload::LogoutRequest
            | Payload::LogoutResponse { .. } => true,
        }
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Creation time, milliseconds since the UNIX epoch (UTC).
    pub timestamp_ms: u64,
    pub version: u8,
    correlation_id: Option<u32>,
    pub payload: Payload,
}

impl Packet {
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp_ms: current_timestamp_ms(),
            version: PROTOCOL_VERSION,
            correlation_id: None,
            payload,
        }
    }

    /// Tag the packet as a request (or the reply to one). `0` clears the tag.
    pub fn with_correlation_id(mut self, id: u32) -> Self {
        self.set_correlation_id(id);
        self
    }

    pub fn set_correlation_id(&mut self, id: u32) {
        self.correlation_id = (id != 0).then_some(id);
    }

    pub fn correlation_id(&self) -> Option<u32> {
        self.correlation_id.filter(|id| *id != 0)
    }

    pub fn packet_type(&self) -> PacketType {
        self.payload.packet_type()
    }

    pub fn response_status(&self) -> Option<&ResponseStatus> {
        self.payload.status()
    }

    /// Version matches, timestamp inside the default skew window, payload invariants hold.
    pub fn is_valid(&self) -> bool {
        self.is_valid_within(MAX_CLOCK_SKEW)
    }

    pub fn is_valid_within(&self, max_clock_skew: Duration) -> bool {
        self.version == PROTOCOL_VERSION
            && verify_timestamp(self.timestamp_ms, max_clock_skew)
            && self.payload.is_valid()
    }

    pub fn heartbeat() -> Self {
        Self::new(Payload::Heartbeat {
            client_time_ms: current_timestamp_ms(),
        })
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(Payload::HeartbeatAck {
            server_time_ms: current_timestamp_ms(),
        })
    }

    /// Disconnect notice whose `reconnect_allowed` hint follows the error code.
    pub fn disconnect(reason: impl Into<String>, error_code: Option<ErrorCode>) -> Self {
        Self::new(Payload::Disconnect {
            reason: reason.into(),
            error_code,
            reconnect_allowed: error_code.map_or(true, ErrorCode::allows_reconnect),
        })
    }

    pub fn error_response(
        code: ErrorCode,
        message: impl Into<String>,
        correlation_id: Option<u32>,
    ) -> Self {
        Self::new(Payload::ErrorResponse {
            status: ResponseStatus::failure(code, message),
        })
        .with_correlation_id(correlation_id.unwrap_or(0))
    }

    pub fn login_request(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Payload::LoginRequest {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Payload::ChatMessage {
            sender: sender.into(),
            text: text.into(),
        })
    }
}
