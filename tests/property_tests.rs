//! Property-based tests using proptest
//!
//! These tests check framing and packet invariants across randomly generated
//! inputs: any byte stream is either decoded or rejected without panicking,
//! and frames survive arbitrary fragmentation.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use arena_protocol::config::MAX_PACKET_SIZE;
use arena_protocol::core::codec::{decode_packet, encode_packet, FrameCodec};
use arena_protocol::error::ErrorCode;
use arena_protocol::protocol::message::{Packet, PacketType, Payload};
use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn arb_packet() -> impl Strategy<Value = Packet> {
    let payload = prop_oneof![
        any::<u64>().prop_map(|client_time_ms| Payload::Heartbeat { client_time_ms }),
        ("[a-z]{1,16}", "[ -~]{1,32}").prop_map(|(username, password)| Payload::LoginRequest {
            username,
            password,
        }),
        "[0-9a-f]{64}".prop_map(|session_token| Payload::ReconnectRequest { session_token }),
        ("[a-z]{0,12}", ".{1,200}").prop_map(|(sender, text)| Payload::ChatMessage { sender, text }),
        ("[ -~]{0,40}", any::<bool>()).prop_map(|(reason, reconnect_allowed)| Payload::Disconnect {
            reason,
            error_code: Some(ErrorCode::Timeout),
            reconnect_allowed,
        }),
    ];
    (payload, any::<u32>()).prop_map(|(payload, id)| Packet::new(payload).with_correlation_id(id))
}

// Property: a packet survives serialization with its type tag and correlation id
proptest! {
    #[test]
    fn prop_packet_roundtrip(packet in arb_packet()) {
        let body = encode_packet(&packet, MAX_PACKET_SIZE).expect("encode");
        let decoded = decode_packet(&body).expect("decode");

        prop_assert_eq!(decoded.packet_type(), packet.packet_type());
        prop_assert_eq!(decoded.correlation_id(), packet.correlation_id());
        prop_assert_eq!(decoded, packet);
    }
}

// Property: arbitrary bodies never panic the deserializer
proptest! {
    #[test]
    fn prop_garbage_body_is_an_error_not_a_panic(body in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_packet(&body);
    }
}

// Property: arbitrary byte streams never panic the frame decoder, and any
// frame it yields respects the size limit
proptest! {
    #[test]
    fn prop_frame_decoder_total(stream in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&stream[..]);
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            prop_assert!(!frame.is_empty());
            prop_assert!(frame.len() <= 1024);
        }
    }
}

// Property: frames reassemble no matter how the stream is split
proptest! {
    #[test]
    fn prop_fragmented_stream_reassembles(
        packets in prop::collection::vec(arb_packet(), 1..8),
        chunk in 1usize..64,
    ) {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        for packet in &packets {
            codec.encode(encode_packet(packet, MAX_PACKET_SIZE).unwrap(), &mut wire).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(decode_packet(&frame).unwrap());
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, packets);
    }
}

// Property: the declared length must be in 1..=max, otherwise decoding fails
proptest! {
    #[test]
    fn prop_out_of_range_length_rejected(declared in prop_oneof![i32::MIN..=0, 1025i32..=i32::MAX]) {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&declared.to_le_bytes());
        prop_assert!(codec.decode(&mut buf).is_err());
    }
}

// Property: every packet type name maps back to itself
proptest! {
    #[test]
    fn prop_packet_type_names_roundtrip(index in 0usize..PacketType::ALL.len()) {
        let packet_type = PacketType::ALL[index];
        prop_assert_eq!(PacketType::from_name(packet_type.name()), Some(packet_type));
    }
}
