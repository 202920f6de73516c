//! Frame codec for encoding/decoding packets
//!
//! One datagram holds exactly one frame. Decoding never fails on foreign traffic:
//! datagrams that are too short or carry the wrong magic are returned as-is so
//! another consumer can have them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use thiserror::Error;

use super::{declared_text_length, packet_types, InboundPacket, Packet, HEADER_SIZE, MAGIC};

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated {packet} frame: needed {needed} more bytes, {available} available")]
    Truncated {
        packet: &'static str,
        needed: usize,
        available: usize,
    },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Outcome of decoding one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A protocol packet
    Packet(InboundPacket),
    /// Not a protocol datagram; the original bytes, unmodified
    Foreign(Bytes),
    /// Valid header with a type tag we do not know
    Unknown(u32),
}

/// Encode a packet into a buffer
pub fn encode(packet: &Packet, buf: &mut BytesMut) {
    buf.put_u32(MAGIC);
    buf.put_u32(packet.type_id());

    match packet {
        Packet::DiscoveryRequest | Packet::DiscoveryReply => {}
        Packet::TextMessage { content } => {
            buf.put_u8(declared_text_length(content));
            buf.put_slice(content.as_bytes());
        }
    }
}

/// Encode a packet into a standalone frame
pub fn encode_frame(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_hint(packet));
    encode(packet, &mut buf);
    buf.freeze()
}

fn payload_hint(packet: &Packet) -> usize {
    match packet {
        Packet::TextMessage { content } => 1 + content.len(),
        _ => 0,
    }
}

/// Decode one datagram received from `sender`
pub fn decode(datagram: Bytes, sender: SocketAddr) -> CodecResult<Decoded> {
    if datagram.len() < HEADER_SIZE {
        return Ok(Decoded::Foreign(datagram));
    }

    let mut buf = &datagram[..];
    if buf.get_u32() != MAGIC {
        return Ok(Decoded::Foreign(datagram));
    }

    let packet = match buf.get_u32() {
        packet_types::DISCOVERY_REQUEST => Packet::DiscoveryRequest,
        packet_types::DISCOVERY_REPLY => Packet::DiscoveryReply,
        packet_types::TEXT_MESSAGE => decode_text(&mut buf)?,
        other => return Ok(Decoded::Unknown(other)),
    };

    Ok(Decoded::Packet(InboundPacket::new(sender, packet)))
}

fn decode_text(buf: &mut &[u8]) -> CodecResult<Packet> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated {
            packet: "TextMessage",
            needed: 1,
            available: 0,
        });
    }

    let length = buf.get_u8() as usize;
    if buf.remaining() < length {
        return Err(CodecError::Truncated {
            packet: "TextMessage",
            needed: length,
            available: buf.remaining(),
        });
    }

    // Bytes past the declared length are ignored
    let content = String::from_utf8_lossy(&buf[..length]).into_owned();
    buf.advance(length);

    Ok(Packet::TextMessage { content })
}
