//! Send gateway
//!
//! Every send opens its own UDP socket, writes one frame and lets the socket go.
//! There is no retry and no acknowledgment.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

use super::{bind_udp, resolve_host};
use crate::protocol::{encode_frame, Packet};

/// Send errors
#[derive(Error, Debug)]
pub enum SendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Short write to {addr}: {written} of {expected} bytes")]
    ShortWrite {
        addr: SocketAddr,
        written: usize,
        expected: usize,
    },
}

pub type SendResult<T> = Result<T, SendError>;

/// Anything that can put a single packet on the wire
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send(&self, destination: SocketAddr, packet: &Packet) -> SendResult<()>;
}

/// One-shot UDP sender
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpGateway;

impl UdpGateway {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `host` and send one packet to it, returning the address it went to
    pub async fn send_to_host(&self, host: &str, port: u16, packet: &Packet) -> SendResult<SocketAddr> {
        let destination = resolve_host(host, port)
            .await
            .map_err(|source| SendError::Resolve {
                host: host.to_string(),
                source,
            })?;
        self.send(destination, packet).await?;
        Ok(destination)
    }
}

#[async_trait]
impl PacketSender for UdpGateway {
    async fn send(&self, destination: SocketAddr, packet: &Packet) -> SendResult<()> {
        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
            SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
        };

        let socket = bind_udp(local, false)?;
        socket.connect(destination).await?;

        let frame = encode_frame(packet);
        let written = socket.send(&frame).await?;
        if written != frame.len() {
            return Err(SendError::ShortWrite {
                addr: destination,
                written,
                expected: frame.len(),
            });
        }

        tracing::trace!("Sent {:?} to {}", packet.kind(), destination);
        Ok(())
    }
}
