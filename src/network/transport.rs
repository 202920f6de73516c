//! LanChat transport
//!
//! Owns the listening UDP socket. Each received datagram is decoded and either fed
//! to the dispatch pipeline or, when it is not a protocol frame, handed out
//! unchanged as a [`TransportEvent::ForeignDatagram`].

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::{bind_udp, NetworkConfig, PacketSender, SendError, SendResult};
use crate::dispatch::Pipeline;
use crate::protocol::{decode, encode_frame, Decoded, Packet, MAX_DATAGRAM_SIZE};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Transport not running")]
    NotRunning,

    #[error("Transport is closed")]
    Closed,

    #[error("Bind to {addr} failed: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Events emitted by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Receive loop started
    Started {
        local_addr: SocketAddr,
    },
    /// Receive loop stopped and the socket was released
    Stopped,
    /// A datagram that is not a protocol frame, passed through untouched
    ForeignDatagram {
        sender: SocketAddr,
        payload: Bytes,
    },
    /// Error occurred
    Error {
        message: String,
    },
}

/// LanChat transport
pub struct Transport {
    /// Listening socket, shared with the receive loop
    socket: Option<Arc<UdpSocket>>,
    /// Address the socket is bound to
    local_addr: SocketAddr,
    /// Event sender
    event_tx: mpsc::Sender<TransportEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Receive loop task
    task: Option<JoinHandle<()>>,
    /// Whether the receive loop is running
    running: Arc<RwLock<bool>>,
}

impl Transport {
    /// Bind the broadcast-capable listening socket.
    ///
    /// This happens once per transport; a failure here means no networking for this
    /// instance.
    pub async fn bind(config: NetworkConfig) -> TransportResult<Self> {
        let (event_tx, event_rx) = mpsc::channel(256);

        let addr = config.bind_addr();
        let socket = match bind_udp(addr, true) {
            Ok(socket) => socket,
            Err(source) => {
                tracing::error!("Failed to bind {}: {}", addr, source);
                return Err(TransportError::BindFailed { addr, source });
            }
        };

        let local_addr = socket.local_addr()?;
        tracing::info!("Transport bound to {}", local_addr);

        Ok(Self {
            socket: Some(Arc::new(socket)),
            local_addr,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            task: None,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A sender that writes from the listening socket itself.
    ///
    /// Replies to anything sent this way come back to the listening port, which is
    /// what discovery broadcasts need. It stops working once the transport stops.
    pub fn sender(&self) -> BoundSender {
        BoundSender {
            socket: self.socket.as_ref().map(Arc::downgrade).unwrap_or_default(),
        }
    }

    /// Start the receive loop
    pub async fn start(&mut self, pipeline: Pipeline) -> TransportResult<()> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(TransportError::AlreadyRunning);
            }
        }

        let socket = self.socket.clone().ok_or(TransportError::Closed)?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(TransportEvent::Started {
                local_addr: self.local_addr,
            })
            .await;

        self.task = Some(tokio::spawn(receive_loop(
            socket,
            pipeline,
            self.event_tx.clone(),
            shutdown_rx,
            self.running.clone(),
        )));

        tracing::info!("Transport listening on {}", self.local_addr);
        Ok(())
    }

    /// Stop the receive loop and close the socket
    pub async fn stop(&mut self) -> TransportResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(TransportError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.socket = None;

        tracing::info!("Transport on {} stopped", self.local_addr);
        Ok(())
    }

    /// Check if the receive loop is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    pipeline: Pipeline,
    event_tx: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    running: Arc<RwLock<bool>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, sender)) => {
                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        handle_datagram(datagram, sender, &pipeline, &event_tx).await;
                    }
                    Err(e) => {
                        // e.g. ICMP port unreachable surfacing on the next recv
                        tracing::warn!("Receive error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Transport shutdown requested");
                break;
            }
        }
    }

    drop(socket);

    let mut running = running.write().await;
    *running = false;

    let _ = event_tx.send(TransportEvent::Stopped).await;
}

async fn handle_datagram(
    datagram: Bytes,
    sender: SocketAddr,
    pipeline: &Pipeline,
    event_tx: &mpsc::Sender<TransportEvent>,
) {
    match decode(datagram, sender) {
        Ok(Decoded::Packet(inbound)) => {
            tracing::debug!("Received {:?} from {}", inbound.kind(), sender);
            pipeline.dispatch(inbound).await;
        }
        Ok(Decoded::Foreign(payload)) => {
            tracing::trace!("Passing through {} foreign bytes from {}", payload.len(), sender);
            if event_tx
                .try_send(TransportEvent::ForeignDatagram { sender, payload })
                .is_err()
            {
                tracing::trace!("Foreign datagram from {} dropped", sender);
            }
        }
        Ok(Decoded::Unknown(type_id)) => {
            tracing::trace!("Dropping unknown packet type {:#x} from {}", type_id, sender);
        }
        Err(e) => {
            tracing::warn!("Malformed frame from {}: {}", sender, e);
            let _ = event_tx.try_send(TransportEvent::Error {
                message: format!("Malformed frame from {}: {}", sender, e),
            });
        }
    }
}

/// Sends through the transport's listening socket
#[derive(Debug, Clone)]
pub struct BoundSender {
    socket: Weak<UdpSocket>,
}

#[async_trait]
impl PacketSender for BoundSender {
    async fn send(&self, destination: SocketAddr, packet: &Packet) -> SendResult<()> {
        let socket = self.socket.upgrade().ok_or_else(|| {
            SendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport is closed",
            ))
        })?;

        let frame = encode_frame(packet);
        let written = socket.send_to(&frame, destination).await?;
        if written != frame.len() {
            return Err(SendError::ShortWrite {
                addr: destination,
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{Faulty, Recorder};
    use crate::protocol::{InboundPacket, PacketKind};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn loopback() -> NetworkConfig {
        NetworkConfig::new(0).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    async fn wait_for_len(recorder: &Recorder, len: usize) -> Vec<InboundPacket> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let seen = recorder.seen();
                if seen.len() >= len {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for packets")
    }

    #[tokio::test]
    async fn test_transport_lifecycle() {
        let mut transport = Transport::bind(loopback()).await.unwrap();
        let mut events = transport.take_event_receiver().unwrap();
        assert!(!transport.is_running().await);

        transport.start(Pipeline::new()).await.unwrap();
        assert!(transport.is_running().await);
        assert!(matches!(
            transport.start(Pipeline::new()).await,
            Err(TransportError::AlreadyRunning)
        ));

        transport.stop().await.unwrap();
        assert!(!transport.is_running().await);

        assert!(matches!(events.recv().await, Some(TransportEvent::Started { .. })));
        assert!(matches!(events.recv().await, Some(TransportEvent::Stopped)));
        assert!(matches!(transport.stop().await, Err(TransportError::NotRunning)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // TEST-NET-3, never assigned to a local interface
        let config = NetworkConfig::new(0)
            .with_bind_address(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));
        let result = Transport::bind(config).await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_reception() {
        let texts = Recorder::new(PacketKind::TextMessage);
        let pipeline = Pipeline::new()
            .add_last(Arc::new(Faulty))
            .add_last(texts.clone());

        let mut transport = Transport::bind(loopback()).await.unwrap();
        transport.start(pipeline).await.unwrap();
        let target = transport.local_addr();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for content in ["boom", "panic", "after"] {
            client
                .send_to(&encode_frame(&Packet::text(content)), target)
                .await
                .unwrap();
        }

        let seen = wait_for_len(&texts, 3).await;
        let contents: Vec<_> = seen
            .iter()
            .map(|inbound| match &inbound.packet {
                Packet::TextMessage { content } => content.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(contents, vec!["boom", "panic", "after"]);
        assert_eq!(seen[2].sender, client.local_addr().unwrap());

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_datagram_passes_through() {
        let mut transport = Transport::bind(loopback()).await.unwrap();
        let mut events = transport.take_event_receiver().unwrap();
        transport.start(Pipeline::new()).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", transport.local_addr()).await.unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Started { .. })));
        match events.recv().await {
            Some(TransportEvent::ForeignDatagram { sender, payload }) => {
                assert_eq!(sender, client.local_addr().unwrap());
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected event {:?}", other),
        }

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_foreign_datagram_is_forwarded_whole() {
        let mut transport = Transport::bind(loopback()).await.unwrap();
        let mut events = transport.take_event_receiver().unwrap();
        transport.start(Pipeline::new()).await.unwrap();

        let payload: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&payload, transport.local_addr()).await.unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Started { .. })));
        match events.recv().await {
            Some(TransportEvent::ForeignDatagram { payload: forwarded, .. }) => {
                assert_eq!(forwarded.len(), payload.len());
                assert_eq!(&forwarded[..], &payload[..]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bound_sender_uses_listening_port() {
        let mut transport = Transport::bind(loopback()).await.unwrap();
        let sender = transport.sender();
        transport.start(Pipeline::new()).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send(peer.local_addr().unwrap(), &Packet::DiscoveryRequest)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, transport.local_addr());
        assert_eq!(&buf[..len], &encode_frame(&Packet::DiscoveryRequest)[..]);

        transport.stop().await.unwrap();
        assert!(sender
            .send(peer.local_addr().unwrap(), &Packet::DiscoveryRequest)
            .await
            .is_err());
    }
}
