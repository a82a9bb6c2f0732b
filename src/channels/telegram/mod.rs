use crate::bus::{InboundMessage, MessageBus, OutboundKind, OutboundMessage, send_inbound};
use crate::channels::base::{BaseChannel, split_message};
use crate::config::TelegramConfig;
use crate::providers::base::Media;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::dispatching::ShutdownToken;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Message as TgMessage, Update, Voice};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Telegram's limit on one text message.
pub const MAX_MESSAGE_LEN: usize = 4096;
/// Largest file the Bot API lets a bot download.
const MAX_VOICE_BYTES: u32 = 20 * 1024 * 1024;

pub struct TelegramChannel {
    config: TelegramConfig,
    bus: Arc<Mutex<MessageBus>>,
    bot: Bot,
    shutdown: Option<ShutdownToken>,
    task: Option<JoinHandle<()>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, bus: Arc<Mutex<MessageBus>>) -> Self {
        let bot = Bot::new(&config.token);
        Self {
            config,
            bus,
            bot,
            shutdown: None,
            task: None,
        }
    }
}

/// Whether a sender passes the `allowFrom` list. Entries match the numeric
/// user id or the username, with or without a leading `@`.
pub fn is_allowed(allow_from: &[String], user_id: u64, username: Option<&str>) -> bool {
    if allow_from.is_empty() {
        return true;
    }
    let id = user_id.to_string();
    allow_from.iter().any(|entry| {
        let entry = entry.trim().trim_start_matches('@');
        entry == id || username.is_some_and(|u| u.eq_ignore_ascii_case(entry))
    })
}

async fn download_voice(bot: &Bot, voice: &Voice) -> Result<Vec<u8>> {
    if voice.file.size > MAX_VOICE_BYTES {
        anyhow::bail!("voice message of {} bytes is too large", voice.file.size);
    }
    let file = bot.get_file(voice.file.id.clone()).await?;
    let mut data = Vec::new();
    bot.download_file(&file.path, &mut data)
        .await
        .context("voice download failed")?;
    Ok(data)
}

async fn on_message(
    bot: Bot,
    msg: TgMessage,
    bus: Arc<Mutex<MessageBus>>,
    allow_from: Arc<Vec<String>>,
) {
    let Some(from) = msg.from.as_ref() else {
        return;
    };
    if !is_allowed(&allow_from, from.id.0, from.username.as_deref()) {
        debug!("ignoring telegram message from unlisted user {}", from.id);
        return;
    }
    let (sender, chat) = (from.id.0 as i64, msg.chat.id.0);
    let inbound = if let Some(text) = msg.text() {
        InboundMessage::new("telegram", sender, chat, text)
    } else if let Some(voice) = msg.voice() {
        match download_voice(&bot, voice).await {
            Ok(audio) => InboundMessage::voice("telegram", sender, chat, audio),
            Err(e) => {
                warn!("could not fetch voice message from {}: {:#}", from.id, e);
                return;
            }
        }
    } else {
        return;
    };
    if let Err(e) = send_inbound(&bus, inbound).await {
        warn!("dropping telegram message from {}: {:#}", from.id, e);
    }
}

#[async_trait]
impl BaseChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> Result<()> {
        info!("starting Telegram bot");
        let bus = self.bus.clone();
        let allow_from = Arc::new(self.config.allow_from.clone());

        let handler = Update::filter_message().endpoint(move |bot: Bot, msg: TgMessage| {
            let bus = bus.clone();
            let allow_from = allow_from.clone();
            async move {
                on_message(bot, msg, bus, allow_from).await;
                Ok::<(), anyhow::Error>(())
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler).build();
        self.shutdown = Some(dispatcher.shutdown_token());
        self.task = Some(tokio::spawn(async move {
            dispatcher.dispatch().await;
        }));
        info!("Telegram channel started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.shutdown.take() {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!("telegram dispatcher was not running: {:?}", e),
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Telegram channel stopped");
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let chat = ChatId(msg.chat_id);
        match &msg.kind {
            OutboundKind::Thoughts(text) => {
                for chunk in split_message(&format!("💭 {}", text), MAX_MESSAGE_LEN) {
                    self.bot.send_message(chat, chunk).await?;
                }
            }
            OutboundKind::Answer(text) => {
                for chunk in split_message(text, MAX_MESSAGE_LEN) {
                    self.bot.send_message(chat, chunk).await?;
                }
            }
            OutboundKind::Media(Media::Image { url: Some(url), .. }) => {
                let url = reqwest::Url::parse(url).context("Invalid image URL")?;
                self.bot.send_photo(chat, InputFile::url(url)).await?;
            }
            OutboundKind::Media(Media::Image {
                data: Some(data), ..
            }) => {
                self.bot
                    .send_photo(chat, InputFile::memory(data.clone()).file_name("image.png"))
                    .await?;
            }
            OutboundKind::Media(Media::Image { .. }) => {
                warn!("image without url or data for chat {}", msg.chat_id);
            }
            OutboundKind::Media(Media::Audio { data, .. }) => {
                self.bot
                    .send_voice(chat, InputFile::memory(data.clone()).file_name("speech.ogg"))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
