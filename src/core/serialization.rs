//! # Packet Body Serialization
//!
//! Packet bodies are bincode-encoded as `(PacketType, Packet)`. The leading
//! type tag is the `u16` discriminant of [`PacketType`] and is checked against the payload on the way in, so a body whose tag
//! and contents disagree is rejected as malformed rather than misrouted.
//!
//! Encoding uses fixed-width little-endian integers. Decoding is bounded by
//! [`MAX_PACKET_SIZE`] and rejects trailing bytes.

use bincode::Options;

use crate::config::MAX_PACKET_SIZE;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Packet, PacketType};

fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn decode_options() -> impl Options {
    encode_options().with_limit(MAX_PACKET_SIZE as u64)
}

/// Serialize a packet into a frame body.
pub fn serialize_packet(packet: &Packet) -> Result<Vec<u8>> {
    encode_options()
        .serialize(&(packet.packet_type(), packet))
        .map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Deserialize a frame body into a packet.
pub fn deserialize_packet(body: &[u8]) -> Result<Packet> {
    let (tag, packet): (PacketType, Packet) = decode_options()
        .deserialize(body)
        .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;

    if tag != packet.packet_type() {
        return Err(ProtocolError::DeserializeError(format!(
            "Type tag {tag} does not match payload {}",
            packet.packet_type()
        )));
    }

    Ok(packet)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::protocol::message::{Payload, ResponseStatus};

    #[test]
    fn test_login_response_roundtrip() {
        let packet = Packet::new(Payload::LoginResponse {
            status: ResponseStatus::ok(),
            session_token: Some("token".into()),
            player_id: 42,
        })
        .with_correlation_id(7);

        let bytes = serialize_packet(&packet).expect("serialize");
        let decoded = deserialize_packet(&bytes).expect("deserialize");

        assert_eq!(decoded, packet);
        assert_eq!(decoded.correlation_id(), Some(7));
        assert_eq!(decoded.timestamp_ms, packet.timestamp_ms);
    }

    #[test]
    fn test_error_response_roundtrip() {
        let packet = Packet::error_response(ErrorCode::RateLimited, "slow down", None);
        let bytes = serialize_packet(&packet).expect("serialize");
        assert_eq!(deserialize_packet(&bytes).expect("deserialize"), packet);
    }

    #[test]
    fn test_mismatched_tag_rejected() {
        let packet = Packet::heartbeat();
        let bytes = encode_options()
            .serialize(&(PacketType::LoginRequest, &packet))
            .expect("serialize");

        assert!(matches!(
            deserialize_packet(&bytes),
            Err(ProtocolError::DeserializeError(_))
        ));
    }

    #[test]
    fn test_body_leads_with_numeric_type_tag() {
        let login = serialize_packet(&Packet::login_request("a", "pw")).expect("serialize");
        assert_eq!(&login[..2], &10u16.to_le_bytes());

        let chat = serialize_packet(&Packet::chat("a", "hi")).expect("serialize");
        assert_eq!(&chat[..2], &100u16.to_le_bytes());
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let mut bytes = serialize_packet(&Packet::heartbeat()).expect("serialize");
        bytes[..2].copy_from_slice(&999u16.to_le_bytes());

        assert!(matches!(
            deserialize_packet(&bytes),
            Err(ProtocolError::DeserializeError(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            deserialize_packet(&[0xFF; 16]),
            Err(ProtocolError::DeserializeError(_))
        ));
        assert!(deserialize_packet(&[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = serialize_packet(&Packet::heartbeat()).expect("serialize");
        bytes.push(0);
        assert!(deserialize_packet(&bytes).is_err());
    }
}
