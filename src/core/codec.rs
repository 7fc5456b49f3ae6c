//! # Frame Codec
//!
//! Tokio codec for `[i32 LE length][body]` frames.
//!
//! The decoder yields raw bodies; turning a body into a [`Packet`] is a
//! separate step ([`decode_packet`]) so a malformed body never poisons the
//! framing state. A declared length that is non-positive or above the
//! maximum is reported as [`ProtocolError::InvalidFrameLength`] before any
//! body bytes are buffered, and the caller is expected to drop the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{FRAME_HEADER_LEN, MAX_PACKET_SIZE};
use crate::core::serialization::{deserialize_packet, serialize_packet};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Packet;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(i32::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&src[..FRAME_HEADER_LEN]);
        let declared = i32::from_le_bytes(header);

        if declared <= 0 || declared as usize > self.max_frame_size {
            return Err(ProtocolError::InvalidFrameLength(declared as i64));
        }

        let body_len = declared as usize;
        let total = FRAME_HEADER_LEN + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        Ok(Some(src.split_to(body_len)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            // Peer closed with a partial header or body on the wire.
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        if body.is_empty() {
            return Err(ProtocolError::InvalidFrameLength(0));
        }
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(body.len()));
        }

        dst.reserve(FRAME_HEADER_LEN + body.len());
        dst.put_i32_le(body.len() as i32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

/// Serialize a packet into a frame body, rejecting bodies above `max_size`.
pub fn encode_packet(packet: &Packet, max_size: usize) -> Result<Bytes> {
    let body = serialize_packet(packet)?;
    if body.len() > max_size {
        return Err(ProtocolError::OversizedPacket(body.len()));
    }
    Ok(Bytes::from(body))
}

/// Deserialize a frame body produced by [`FrameCodec`].
pub fn decode_packet(body: &[u8]) -> Result<Packet> {
    deserialize_packet(body)
}
