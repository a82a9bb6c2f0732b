use crate::bus::{MessageBus, OutboundMessage};
use crate::channels::base::BaseChannel;
use crate::channels::telegram::TelegramChannel;
use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

const SEND_ATTEMPTS: u32 = 3;

pub struct ChannelManager {
    channels: Vec<Box<dyn BaseChannel>>,
}

impl ChannelManager {
    pub fn new(config: &Config, bus: Arc<Mutex<MessageBus>>) -> Self {
        let mut channels: Vec<Box<dyn BaseChannel>> = Vec::new();
        if config.telegram.enabled && !config.telegram.token.is_empty() {
            channels.push(Box::new(TelegramChannel::new(config.telegram.clone(), bus)));
            info!("Telegram channel enabled");
        }
        Self { channels }
    }

    pub fn with_channels(channels: Vec<Box<dyn BaseChannel>>) -> Self {
        Self { channels }
    }

    pub fn enabled_channels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub async fn start_all(&mut self) -> Result<()> {
        for channel in &mut self.channels {
            let name = channel.name().to_string();
            channel
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to start channel {}: {}", name, e))?;
            info!("channel {} started", name);
        }
        Ok(())
    }

    /// Stop every channel; failures are logged so the rest still stop.
    pub async fn stop_all(&mut self) {
        for channel in &mut self.channels {
            if let Err(e) = channel.stop().await {
                warn!("failed to stop channel {}: {}", channel.name(), e);
            }
        }
    }

    /// Deliver to the named channel, retrying with a linear backoff.
    pub async fn send(&self, msg: &OutboundMessage) {
        let Some(channel) = self.channels.iter().find(|c| c.name() == msg.channel) else {
            error!(
                "no channel found for {} (available: {:?})",
                msg.channel,
                self.enabled_channels()
            );
            return;
        };
        for attempt in 1..=SEND_ATTEMPTS {
            match channel.send(msg).await {
                Ok(()) => {
                    debug!("delivered message to {}:{}", msg.channel, msg.chat_id);
                    return;
                }
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(
                        "send to {} failed (attempt {}/{}): {}, retrying",
                        msg.channel, attempt, SEND_ATTEMPTS, e
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                }
                Err(e) => error!(
                    "giving up on message to {} after {} attempts: {}",
                    msg.channel, SEND_ATTEMPTS, e
                ),
            }
        }
    }
}

/// Outbound delivery for a manager shared with the shutdown path. The lock is
/// taken per message, so channels can be stopped while delivery continues.
/// Once `stop` fires the queue refuses new messages and whatever is already
/// queued is still delivered before this returns.
pub async fn deliver_outbound(
    channels: Arc<Mutex<ChannelManager>>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut stopping = false;
    loop {
        let next = if stopping {
            outbound_rx.recv().await
        } else {
            tokio::select! {
                msg = outbound_rx.recv() => msg,
                _ = &mut stop => {
                    debug!("closing outbound queue, draining what is left");
                    outbound_rx.close();
                    stopping = true;
                    continue;
                }
            }
        };
        let Some(msg) = next else {
            break;
        };
        channels.lock().await.send(&msg).await;
    }
    debug!("outbound delivery finished");
}

#[cfg(test)]
mod tests;
