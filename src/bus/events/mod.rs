use crate::providers::base::Media;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: i64,
    pub chat_id: i64,
    pub content: String,
    /// Recorded audio to transcribe in place of `content`.
    pub voice: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, sender_id: i64, chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            sender_id,
            chat_id,
            content: content.into(),
            voice: None,
            timestamp: Utc::now(),
        }
    }

    pub fn voice(channel: impl Into<String>, sender_id: i64, chat_id: i64, audio: Vec<u8>) -> Self {
        Self {
            voice: Some(audio),
            ..Self::new(channel, sender_id, chat_id, "")
        }
    }

    /// Key used for inbound rate limiting.
    pub fn sender_key(&self) -> String {
        format!("{}:{}", self.channel, self.sender_id)
    }
}

#[derive(Debug, Clone)]
pub enum OutboundKind {
    /// Intermediate model reasoning, shown before tools run.
    Thoughts(String),
    Answer(String),
    Media(Media),
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: i64,
    pub kind: OutboundKind,
}

impl OutboundMessage {
    pub fn answer(channel: impl Into<String>, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id,
            kind: OutboundKind::Answer(text.into()),
        }
    }

    /// Text to deliver, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            OutboundKind::Thoughts(text) | OutboundKind::Answer(text) => Some(text),
            OutboundKind::Media(_) => None,
        }
    }
}
