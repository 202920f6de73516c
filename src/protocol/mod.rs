//! Protocol module - Defines the datagram wire protocol for LanChat peers
//!
//! Every protocol datagram carries a fixed header followed by a type-specific body:
//! - 4 bytes magic number (big-endian `0x250704E0`)
//! - 4 bytes packet type (big-endian)
//! - Variable length payload (TextMessage only)
//!
//! Anything that does not start with the magic number is not ours and is handed
//! back to the caller untouched.

mod codec;
mod packet;

pub use codec::*;
pub use packet::*;

/// Default UDP port for LanChat traffic
pub const DEFAULT_PORT: u16 = 8888;

/// Magic number identifying protocol datagrams
pub const MAGIC: u32 = 0x2507_04E0;

/// Header size: magic(4) + type(4) = 8 bytes
pub const HEADER_SIZE: usize = 8;

/// Largest UDP payload; foreign datagrams are read whole
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Upper bound for the text length byte
pub const MAX_TEXT_LEN: usize = 100;
