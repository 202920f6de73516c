//! Packet definitions
//!
//! Defines the packets exchanged between LanChat peers.

use std::net::SocketAddr;

use super::MAX_TEXT_LEN;

/// Wire type tags
pub mod packet_types {
    pub const DISCOVERY_REQUEST: u32 = 0x0;
    pub const DISCOVERY_REPLY: u32 = 0x1;
    pub const TEXT_MESSAGE: u32 = 0x3;
}

/// Discriminant of a [`Packet`], used by handlers to filter what they accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    DiscoveryRequest,
    DiscoveryReply,
    TextMessage,
}

/// All protocol packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Broadcast probe asking every peer to identify itself
    DiscoveryRequest,

    /// Answer to a probe; the datagram's source address is the payload
    DiscoveryReply,

    /// A chat message
    TextMessage {
        content: String,
    },
}

impl Packet {
    pub fn text(content: impl Into<String>) -> Self {
        Packet::TextMessage {
            content: content.into(),
        }
    }

    /// Get the wire type tag
    pub fn type_id(&self) -> u32 {
        match self {
            Packet::DiscoveryRequest => packet_types::DISCOVERY_REQUEST,
            Packet::DiscoveryReply => packet_types::DISCOVERY_REPLY,
            Packet::TextMessage { .. } => packet_types::TEXT_MESSAGE,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::DiscoveryRequest => PacketKind::DiscoveryRequest,
            Packet::DiscoveryReply => PacketKind::DiscoveryReply,
            Packet::TextMessage { .. } => PacketKind::TextMessage,
        }
    }
}

/// A decoded packet together with the address it arrived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub sender: SocketAddr,
    pub packet: Packet,
}

impl InboundPacket {
    pub fn new(sender: SocketAddr, packet: Packet) -> Self {
        Self { sender, packet }
    }

    pub fn kind(&self) -> PacketKind {
        self.packet.kind()
    }
}

/// Length byte written in front of a text body.
///
/// Counted in UTF-16 code units and capped at [`MAX_TEXT_LEN`], while the body
/// itself is written as UTF-8 in full. For non-ASCII content the two disagree and
/// a receiver only reads the first `declared_text_length` bytes.
pub fn declared_text_length(content: &str) -> u8 {
    content.encode_utf16().count().min(MAX_TEXT_LEN) as u8
}
