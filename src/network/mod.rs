//! Network module - Handles UDP communication between peers
//!
//! Provides:
//! - Transport that owns the listening socket and feeds the dispatch pipeline
//! - Send gateway for one-shot outbound datagrams
//! - Socket helpers shared by both

mod gateway;
mod transport;

pub use gateway::*;
pub use transport::*;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on and to address peers at
    pub port: u16,
    /// Local address to bind the listener to
    pub bind_address: IpAddr,
    /// Destination for discovery broadcasts
    pub broadcast_address: Ipv4Addr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: Ipv4Addr::BROADCAST,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.broadcast_address), self.port)
    }
}

impl From<&crate::config::NetworkConfig> for NetworkConfig {
    fn from(config: &crate::config::NetworkConfig) -> Self {
        Self {
            port: config.port,
            bind_address: config.bind_address,
            broadcast_address: config.broadcast_address,
        }
    }
}

/// Create a non-blocking, broadcast-capable UDP socket bound to `addr`
pub(crate) fn bind_udp(addr: SocketAddr, reuse_address: bool) -> std::io::Result<tokio::net::UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    tokio::net::UdpSocket::from_std(socket.into())
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
