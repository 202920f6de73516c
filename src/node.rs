//! LanChat node
//!
//! Wires the transport, the dispatch pipeline, the save queue and the discovery
//! coordinator together. Handler order matches the wire types: discovery requests,
//! discovery replies, then text messages.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::discovery::{Discovery, DiscoveryConfig};
use crate::dispatch::{Pipeline, ReplyHandler, TextHandler};
use crate::network::{NetworkConfig, Transport, TransportError, TransportEvent, UdpGateway};
use crate::store::{MessageStore, SaveQueue, SaveReport};

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type NodeResult<T> = Result<T, NodeError>;

/// A running LanChat peer
pub struct Node {
    transport: Transport,
    discovery: Discovery,
    report_rx: Option<mpsc::Receiver<SaveReport>>,
}

impl Node {
    /// Bind the transport and start every background task
    pub async fn start(config: &Config, store: Arc<dyn MessageStore>) -> NodeResult<Self> {
        let net_config = NetworkConfig::from(&config.network);
        let mut transport = Transport::bind(net_config.clone()).await?;

        // port 0 binds an ephemeral port; peers are addressed at whatever we got
        let port = transport.local_addr().port();
        let gateway = Arc::new(UdpGateway::new());

        let discovery_config = DiscoveryConfig {
            target: SocketAddr::new(net_config.broadcast_addr().ip(), port),
            window: Duration::from_millis(config.network.discovery_window_ms),
        };
        let (discovery, collector) = Discovery::spawn(discovery_config, Arc::new(transport.sender()));

        let (report_tx, report_rx) = mpsc::channel(256);
        let queue = SaveQueue::start(
            store,
            config.storage.workers,
            config.storage.queue_capacity,
            Some(report_tx),
        );

        let pipeline = Pipeline::new()
            .add_last(Arc::new(ReplyHandler::new(gateway)))
            .add_last(Arc::new(collector))
            .add_last(Arc::new(TextHandler::new(queue)));

        transport.start(pipeline).await?;

        Ok(Self {
            transport,
            discovery,
            report_rx: Some(report_rx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn discovery_mut(&mut self) -> &mut Discovery {
        &mut self.discovery
    }

    /// Take the transport event receiver (can only be called once)
    pub fn take_transport_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.transport.take_event_receiver()
    }

    /// Take the save report receiver (can only be called once)
    pub fn take_save_reports(&mut self) -> Option<mpsc::Receiver<SaveReport>> {
        self.report_rx.take()
    }

    /// Stop receiving and release the socket
    pub async fn stop(&mut self) -> NodeResult<()> {
        self.transport.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ScanState;
    use crate::network::PacketSender;
    use crate::protocol::Packet;
    use crate::store::tests::MemoryStore;
    use crate::store::Direction;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback_config() -> Config {
        let mut config = Config::default();
        config.network.port = 0;
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.network.broadcast_address = Ipv4Addr::LOCALHOST;
        config.network.discovery_window_ms = 300;
        config
    }

    #[tokio::test]
    async fn test_node_discovers_itself_over_loopback() {
        let store = Arc::new(MemoryStore::default());
        let mut node = Node::start(&loopback_config(), store).await.unwrap();

        let outcome = node.discovery().discover().await.unwrap();
        assert_eq!(outcome.peers, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert_eq!(node.discovery().state(), ScanState::Complete);

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_text_between_nodes_is_saved() {
        let receiver_store = Arc::new(MemoryStore::default());
        let mut receiver = Node::start(&loopback_config(), receiver_store.clone())
            .await
            .unwrap();
        let mut reports = receiver.take_save_reports().unwrap();

        UdpGateway::new()
            .send(receiver.local_addr(), &Packet::text("are you there?"))
            .await
            .unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report, SaveReport::Saved { .. }));

        let received = receiver_store.messages();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].sender, "127.0.0.1");
        assert_eq!(received[0].content, "are you there?");
        assert_eq!(received[0].direction, Direction::Received);

        receiver.stop().await.unwrap();
    }
}
