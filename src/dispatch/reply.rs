//! Answers discovery probes

use async_trait::async_trait;
use std::sync::Arc;

use super::{HandlerResult, PacketHandler};
use crate::network::PacketSender;
use crate::protocol::{InboundPacket, Packet, PacketKind};

/// Sends a DiscoveryReply back to whoever sent a DiscoveryRequest
pub struct ReplyHandler {
    sender: Arc<dyn PacketSender>,
}

impl ReplyHandler {
    pub fn new(sender: Arc<dyn PacketSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl PacketHandler for ReplyHandler {
    fn name(&self) -> &'static str {
        "discovery-reply"
    }

    fn accepts(&self, kind: PacketKind) -> bool {
        kind == PacketKind::DiscoveryRequest
    }

    async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()> {
        tracing::debug!("Discovery request from {}", inbound.sender);
        self.sender.send(inbound.sender, &Packet::DiscoveryReply).await?;
        Ok(())
    }
}
