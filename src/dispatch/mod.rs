//! Dispatch module - Routes decoded packets to their handlers
//!
//! Handlers are kept in insertion order and each one declares which packet kinds it
//! accepts. Every handler call runs behind a failure boundary: an error or a panic
//! is logged and the pipeline moves on.

mod reply;
mod text;

pub use reply::*;
pub use text::*;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::network::SendError;
use crate::protocol::{InboundPacket, PacketKind};
use crate::store::QueueError;

/// Handler errors
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Save queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Discovery coordinator is gone")]
    CoordinatorGone,
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// A stage of the dispatch pipeline
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &'static str;

    /// Whether this handler wants packets of `kind`
    fn accepts(&self, kind: PacketKind) -> bool;

    async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()>;
}

/// Summary of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
    pub failed: usize,
}

/// Ordered handler chain
#[derive(Clone, Default)]
pub struct Pipeline {
    handlers: Vec<Arc<dyn PacketHandler>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the end of the chain
    pub fn add_last(mut self, handler: Arc<dyn PacketHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Deliver a packet once to every handler that accepts it, in order
    pub async fn dispatch(&self, inbound: InboundPacket) -> DispatchOutcome {
        let kind = inbound.kind();
        let mut outcome = DispatchOutcome::default();

        for handler in self.handlers.iter().filter(|h| h.accepts(kind)) {
            let name = handler.name();
            let task = {
                let handler = handler.clone();
                let inbound = inbound.clone();
                tokio::spawn(async move { handler.handle(&inbound).await })
            };

            match task.await {
                Ok(Ok(())) => outcome.handled += 1,
                Ok(Err(e)) => {
                    tracing::error!("Handler {} failed on {:?} from {}: {}", name, kind, inbound.sender, e);
                    outcome.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Handler {} aborted on {:?} from {}: {}", name, kind, inbound.sender, e);
                    outcome.failed += 1;
                }
            }
        }

        if outcome.handled + outcome.failed == 0 {
            tracing::debug!("No handler for {:?} from {}", kind, inbound.sender);
        }

        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::Packet;
    use std::sync::Mutex;

    /// Records every packet it sees
    pub(crate) struct Recorder {
        kind: PacketKind,
        pub(crate) seen: Mutex<Vec<InboundPacket>>,
    }

    impl Recorder {
        pub(crate) fn new(kind: PacketKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn seen(&self) -> Vec<InboundPacket> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PacketHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn accepts(&self, kind: PacketKind) -> bool {
            kind == self.kind
        }

        async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()> {
            self.seen.lock().unwrap().push(inbound.clone());
            Ok(())
        }
    }

    /// Fails on content "boom" and panics on content "panic"
    pub(crate) struct Faulty;

    #[async_trait]
    impl PacketHandler for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn accepts(&self, kind: PacketKind) -> bool {
            kind == PacketKind::TextMessage
        }

        async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()> {
            match &inbound.packet {
                Packet::TextMessage { content } if content == "boom" => {
                    Err(HandlerError::Queue(QueueError::Closed))
                }
                Packet::TextMessage { content } if content == "panic" => {
                    panic!("handler panicked")
                }
                _ => Ok(()),
            }
        }
    }

    fn inbound(packet: Packet) -> InboundPacket {
        InboundPacket::new("10.0.0.7:8888".parse().unwrap(), packet)
    }

    #[tokio::test]
    async fn test_handlers_filter_by_kind() {
        let requests = Recorder::new(PacketKind::DiscoveryRequest);
        let texts = Recorder::new(PacketKind::TextMessage);
        let pipeline = Pipeline::new()
            .add_last(requests.clone())
            .add_last(texts.clone());

        let outcome = pipeline.dispatch(inbound(Packet::text("hey"))).await;

        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 0 });
        assert!(requests.seen().is_empty());
        assert_eq!(texts.seen(), vec![inbound(Packet::text("hey"))]);
    }

    #[tokio::test]
    async fn test_unhandled_packet_is_a_noop() {
        let pipeline = Pipeline::new().add_last(Recorder::new(PacketKind::TextMessage));
        let outcome = pipeline.dispatch(inbound(Packet::DiscoveryReply)).await;
        assert_eq!(outcome, DispatchOutcome::default());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_handlers() {
        let texts = Recorder::new(PacketKind::TextMessage);
        let pipeline = Pipeline::new()
            .add_last(Arc::new(Faulty))
            .add_last(texts.clone());

        let outcome = pipeline.dispatch(inbound(Packet::text("boom"))).await;
        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 1 });

        let outcome = pipeline.dispatch(inbound(Packet::text("panic"))).await;
        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 1 });

        let outcome = pipeline.dispatch(inbound(Packet::text("fine"))).await;
        assert_eq!(outcome, DispatchOutcome { handled: 2, failed: 0 });

        assert_eq!(texts.seen().len(), 3);
    }
}
