use crate::bus::{MessageBus, OutboundKind, OutboundMessage, send_outbound};
use crate::providers::base::Media;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Where the conversation loop sends user-visible output. Fire-and-forget:
/// delivery failures are logged by the implementation, never returned.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn thoughts(&self, chat_id: i64, text: &str);

    async fn answer(&self, chat_id: i64, text: &str);

    async fn media(&self, chat_id: i64, media: Media);
}

/// Publishes onto the bus's outbound queue for one channel.
#[derive(Clone)]
pub struct BusSink {
    bus: Arc<Mutex<MessageBus>>,
    channel: String,
}

impl BusSink {
    pub fn new(bus: Arc<Mutex<MessageBus>>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
        }
    }

    async fn publish(&self, chat_id: i64, kind: OutboundKind) {
        let msg = OutboundMessage {
            channel: self.channel.clone(),
            chat_id,
            kind,
        };
        if let Err(e) = send_outbound(&self.bus, msg).await {
            warn!("dropping outbound message for chat {}: {:#}", chat_id, e);
        }
    }
}

#[async_trait]
impl OutboundSink for BusSink {
    async fn thoughts(&self, chat_id: i64, text: &str) {
        self.publish(chat_id, OutboundKind::Thoughts(text.to_string()))
            .await;
    }

    async fn answer(&self, chat_id: i64, text: &str) {
        self.publish(chat_id, OutboundKind::Answer(text.to_string()))
            .await;
    }

    async fn media(&self, chat_id: i64, media: Media) {
        self.publish(chat_id, OutboundKind::Media(media)).await;
    }
}
