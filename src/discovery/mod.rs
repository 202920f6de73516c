//! Peer discovery module
//!
//! Finds LanChat peers on the local network: broadcast one DiscoveryRequest, then
//! collect the source addresses of DiscoveryReply packets for a fixed window.
//!
//! The result set lives inside the coordinator task. The transport never touches it;
//! replies are forwarded through a channel by [`ReplyCollector`].

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::dispatch::{HandlerError, HandlerResult, PacketHandler};
use crate::network::PacketSender;
use crate::protocol::{InboundPacket, Packet, PacketKind, DEFAULT_PORT};

/// Default collection window
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_millis(3000);

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Discovery broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Discovery coordinator stopped")]
    Stopped,
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Complete,
}

/// Result of a finished scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Unique peer addresses in order of first reply
    pub peers: Vec<IpAddr>,
}

impl ScanOutcome {
    pub fn found(&self) -> bool {
        !self.peers.is_empty()
    }
}

/// Events from the discovery coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A request went out and the window is open
    ScanStarted,
    /// First reply from this address during the current scan
    PeerDiscovered(IpAddr),
    /// The window elapsed
    ScanComplete { found: bool, peers: Vec<IpAddr> },
    /// The broadcast could not be sent
    ScanFailed(String),
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where the request is broadcast to
    pub target: SocketAddr,
    /// How long replies are collected
    pub window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT)),
            window: DEFAULT_DISCOVERY_WINDOW,
        }
    }
}

enum Command {
    Start {
        done: Option<oneshot::Sender<DiscoveryResult<ScanOutcome>>>,
    },
}

/// Handle to a running discovery coordinator
pub struct Discovery {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ScanState>,
    event_rx: Option<mpsc::Receiver<DiscoveryEvent>>,
}

impl Discovery {
    /// Spawn the coordinator task.
    ///
    /// The returned [`ReplyCollector`] must be placed in the dispatch pipeline so
    /// replies reach the coordinator.
    pub fn spawn(config: DiscoveryConfig, sender: Arc<dyn PacketSender>) -> (Self, ReplyCollector) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ScanState::Idle);

        let coordinator = Coordinator {
            config,
            sender,
            replies: reply_rx,
            events: event_tx,
            state: state_tx,
            peers: Vec::new(),
            waiters: Vec::new(),
            deadline: None,
        };
        tokio::spawn(coordinator.run(command_rx));

        let discovery = Self {
            commands: command_tx,
            state: state_rx,
            event_rx: Some(event_rx),
        };
        (discovery, ReplyCollector { tx: reply_tx })
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<DiscoveryEvent>> {
        self.event_rx.take()
    }

    /// Start a scan, or restart the one in progress. Results arrive as events.
    pub async fn start_discovery(&self) -> DiscoveryResult<()> {
        self.commands
            .send(Command::Start { done: None })
            .await
            .map_err(|_| DiscoveryError::Stopped)
    }

    /// Start a scan and wait for it to finish
    pub async fn discover(&self) -> DiscoveryResult<ScanOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Start { done: Some(done_tx) })
            .await
            .map_err(|_| DiscoveryError::Stopped)?;

        done_rx.await.map_err(|_| DiscoveryError::Stopped)?
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }
}

struct Coordinator {
    config: DiscoveryConfig,
    sender: Arc<dyn PacketSender>,
    replies: mpsc::UnboundedReceiver<IpAddr>,
    events: mpsc::Sender<DiscoveryEvent>,
    state: watch::Sender<ScanState>,
    peers: Vec<IpAddr>,
    waiters: Vec<oneshot::Sender<DiscoveryResult<ScanOutcome>>>,
    deadline: Option<Instant>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { done }) => self.begin(done).await,
                    None => break,
                },
                Some(ip) = self.replies.recv() => self.on_reply(ip),
                _ = sleep_until(deadline), if self.deadline.is_some() => self.finish(),
            }
        }

        tracing::debug!("Discovery coordinator stopped");
    }

    async fn begin(&mut self, done: Option<oneshot::Sender<DiscoveryResult<ScanOutcome>>>) {
        if *self.state.borrow() == ScanState::Scanning {
            tracing::info!("Restarting discovery scan");
        }

        self.peers.clear();
        // replies still queued belong to an earlier cycle
        while self.replies.try_recv().is_ok() {}
        self.waiters.extend(done);

        if let Err(e) = self.sender.send(self.config.target, &Packet::DiscoveryRequest).await {
            tracing::error!("Discovery broadcast to {} failed: {}", self.config.target, e);
            self.deadline = None;
            self.state.send_replace(ScanState::Idle);
            self.emit(DiscoveryEvent::ScanFailed(e.to_string()));

            let message = e.to_string();
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(DiscoveryError::BroadcastFailed(message.clone())));
            }
            return;
        }

        tracing::info!(
            "Discovery request sent to {}, collecting replies for {:?}",
            self.config.target,
            self.config.window
        );
        self.deadline = Some(Instant::now() + self.config.window);
        self.state.send_replace(ScanState::Scanning);
        self.emit(DiscoveryEvent::ScanStarted);
    }

    fn on_reply(&mut self, ip: IpAddr) {
        if *self.state.borrow() != ScanState::Scanning {
            tracing::trace!("Ignoring discovery reply from {} outside a scan", ip);
            return;
        }
        if self.peers.contains(&ip) {
            return;
        }

        tracing::info!("Discovered peer {}", ip);
        self.peers.push(ip);
        self.emit(DiscoveryEvent::PeerDiscovered(ip));
    }

    fn finish(&mut self) {
        self.deadline = None;
        self.state.send_replace(ScanState::Complete);

        let outcome = ScanOutcome {
            peers: std::mem::take(&mut self.peers),
        };
        if outcome.found() {
            tracing::info!("Discovery complete: {} peer(s)", outcome.peers.len());
        } else {
            tracing::info!("Discovery complete: no peers found");
        }

        self.emit(DiscoveryEvent::ScanComplete {
            found: outcome.found(),
            peers: outcome.peers.clone(),
        });
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(outcome.clone()));
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::warn!("Discovery event dropped: {:?}", event);
        }
    }
}

/// Pipeline stage forwarding DiscoveryReply senders to the coordinator
#[derive(Clone)]
pub struct ReplyCollector {
    tx: mpsc::UnboundedSender<IpAddr>,
}

#[async_trait]
impl PacketHandler for ReplyCollector {
    fn name(&self) -> &'static str {
        "discovery-collector"
    }

    fn accepts(&self, kind: PacketKind) -> bool {
        kind == PacketKind::DiscoveryReply
    }

    async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()> {
        self.tx
            .send(inbound.sender.ip())
            .map_err(|_| HandlerError::CoordinatorGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{SendError, SendResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(SocketAddr, Packet)>>,
        fail: bool,
    }

    #[async_trait]
    impl PacketSender for RecordingSender {
        async fn send(&self, destination: SocketAddr, packet: &Packet) -> SendResult<()> {
            if self.fail {
                return Err(SendError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "broadcast not permitted",
                )));
            }
            self.sent.lock().unwrap().push((destination, packet.clone()));
            Ok(())
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            target: "192.168.1.255:8888".parse().unwrap(),
            window: Duration::from_millis(3000),
        }
    }

    fn reply_from(addr: &str) -> InboundPacket {
        InboundPacket::new(addr.parse().unwrap(), Packet::DiscoveryReply)
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    async fn next_event(events: &mut mpsc::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
        events.recv().await.expect("coordinator gone")
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_broadcasts_and_collects_unique_peers() {
        let sender = Arc::new(RecordingSender::default());
        let (mut discovery, collector) = Discovery::spawn(config(), sender.clone());
        let mut events = discovery.take_event_receiver().unwrap();

        discovery.start_discovery().await.unwrap();
        assert_eq!(next_event(&mut events).await, DiscoveryEvent::ScanStarted);
        assert_eq!(discovery.state(), ScanState::Scanning);

        collector.handle(&reply_from("192.168.1.7:8888")).await.unwrap();
        collector.handle(&reply_from("192.168.1.7:40000")).await.unwrap();
        collector.handle(&reply_from("192.168.1.3:8888")).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::PeerDiscovered(ip("192.168.1.7"))
        );
        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::PeerDiscovered(ip("192.168.1.3"))
        );
        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::ScanComplete {
                found: true,
                peers: vec![ip("192.168.1.7"), ip("192.168.1.3")],
            }
        );
        assert_eq!(discovery.state(), ScanState::Complete);
        assert_eq!(
            *sender.sent.lock().unwrap(),
            vec![(config().target, Packet::DiscoveryRequest)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_replies_reports_none_found() {
        let sender = Arc::new(RecordingSender::default());
        let (discovery, _collector) = Discovery::spawn(config(), sender);

        let started = Instant::now();
        let outcome = discovery.discover().await.unwrap();

        assert!(!outcome.found());
        assert!(outcome.peers.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(discovery.state(), ScanState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_and_rebroadcasts() {
        let sender = Arc::new(RecordingSender::default());
        let (mut discovery, collector) = Discovery::spawn(config(), sender.clone());
        let mut events = discovery.take_event_receiver().unwrap();

        discovery.start_discovery().await.unwrap();
        assert_eq!(next_event(&mut events).await, DiscoveryEvent::ScanStarted);
        collector.handle(&reply_from("10.1.1.1:8888")).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::PeerDiscovered(ip("10.1.1.1"))
        );

        discovery.start_discovery().await.unwrap();
        assert_eq!(next_event(&mut events).await, DiscoveryEvent::ScanStarted);
        collector.handle(&reply_from("10.1.1.2:8888")).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::PeerDiscovered(ip("10.1.1.2"))
        );

        assert_eq!(
            next_event(&mut events).await,
            DiscoveryEvent::ScanComplete {
                found: true,
                peers: vec![ip("10.1.1.2")],
            }
        );
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_outside_scan_are_ignored() {
        let sender = Arc::new(RecordingSender::default());
        let (discovery, collector) = Discovery::spawn(config(), sender);

        collector.handle(&reply_from("10.1.1.9:8888")).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(discovery.state(), ScanState::Idle);

        let outcome = discovery.discover().await.unwrap();
        assert!(!outcome.found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_failure_returns_to_idle() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let (discovery, _collector) = Discovery::spawn(config(), sender);

        let result = discovery.discover().await;
        assert!(matches!(result, Err(DiscoveryError::BroadcastFailed(_))));
        assert_eq!(discovery.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_collector_ignores_other_kinds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let collector = ReplyCollector { tx };
        assert!(collector.accepts(PacketKind::DiscoveryReply));
        assert!(!collector.accepts(PacketKind::DiscoveryRequest));
        assert!(!collector.accepts(PacketKind::TextMessage));
    }
}
