//! Hands received chat messages to the save queue

use async_trait::async_trait;

use super::{HandlerResult, PacketHandler};
use crate::protocol::{InboundPacket, Packet, PacketKind};
use crate::store::{SaveQueue, StoredMessage};

/// Queues every TextMessage for persistence without waiting on storage
pub struct TextHandler {
    queue: SaveQueue,
}

impl TextHandler {
    pub fn new(queue: SaveQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl PacketHandler for TextHandler {
    fn name(&self) -> &'static str {
        "text-message"
    }

    fn accepts(&self, kind: PacketKind) -> bool {
        kind == PacketKind::TextMessage
    }

    async fn handle(&self, inbound: &InboundPacket) -> HandlerResult<()> {
        let Packet::TextMessage { content } = &inbound.packet else {
            return Ok(());
        };

        let message = StoredMessage::received(inbound.sender.ip().to_string(), content.clone());
        self.queue.submit(message)?;
        Ok(())
    }
}
