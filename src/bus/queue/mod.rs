use crate::bus::{InboundMessage, OutboundMessage};
use anyhow::{Context, Result};
use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

const DEFAULT_RATE_LIMIT: usize = 30;
const DEFAULT_OUTBOUND_RATE_LIMIT: usize = 60;
const DEFAULT_RATE_WINDOW_S: f64 = 60.0;
const DEFAULT_CAPACITY: usize = 1000;
/// Longest a publisher waits on a full queue.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Keys the limiters remember; the least recently seen are forgotten first.
const MAX_TRACKED_KEYS: NonZeroUsize = NonZeroUsize::new(5000).unwrap();

/// Sliding-window counter per key.
struct RateLimiter {
    limit: usize,
    window: Duration,
    seen: LruCache<String, VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            seen: LruCache::new(MAX_TRACKED_KEYS),
        }
    }

    /// Record one event for `key`, or fail if the window is already full.
    fn admit(&mut self, key: &str) -> Result<()> {
        let now = Instant::now();
        let window = self.window;
        let stamps = self.seen.get_or_insert_mut(key.to_string(), VecDeque::new);
        while stamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            stamps.pop_front();
        }
        if stamps.len() >= self.limit {
            warn!(
                "rate limit hit for {} ({} per {:.0}s), dropping message",
                key,
                self.limit,
                window.as_secs_f64()
            );
            anyhow::bail!("{} messages in {:.0}s", self.limit, window.as_secs_f64());
        }
        stamps.push_back(now);
        Ok(())
    }
}

/// Bounded inbound/outbound queues between channels and the dispatcher,
/// rate limited per sender and per destination chat.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Option<mpsc::Receiver<OutboundMessage>>,
    inbound_limiter: RateLimiter,
    outbound_limiter: RateLimiter,
}

impl MessageBus {
    pub fn new(
        rate_limit: usize,
        rate_window_secs: f64,
        inbound_capacity: usize,
        outbound_capacity: usize,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
        let window = Duration::from_secs_f64(rate_window_secs);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            inbound_limiter: RateLimiter::new(rate_limit, window),
            outbound_limiter: RateLimiter::new(DEFAULT_OUTBOUND_RATE_LIMIT, window),
        }
    }

    /// Take the inbound receiver so consumers don't hold the bus lock while awaiting.
    pub fn take_inbound_rx(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.take()
    }

    pub fn take_outbound_rx(&mut self) -> Option<mpsc::Receiver<OutboundMessage>> {
        self.outbound_rx.take()
    }

    /// Rate-check `msg` and hand back the queue it goes on.
    pub fn admit_inbound(&mut self, msg: &InboundMessage) -> Result<mpsc::Sender<InboundMessage>> {
        let key = msg.sender_key();
        self.inbound_limiter
            .admit(&key)
            .with_context(|| format!("Rate limit exceeded for {}", key))?;
        Ok(self.inbound_tx.clone())
    }

    pub fn admit_outbound(&mut self, msg: &OutboundMessage) -> Result<mpsc::Sender<OutboundMessage>> {
        let key = format!("{}:{}", msg.channel, msg.chat_id);
        self.outbound_limiter
            .admit(&key)
            .with_context(|| format!("Outbound rate limit exceeded for {}", key))?;
        Ok(self.outbound_tx.clone())
    }

    pub async fn publish_inbound(&mut self, msg: InboundMessage) -> Result<()> {
        let tx = self.admit_inbound(&msg)?;
        let key = msg.sender_key();
        send_bounded(&tx, msg, "inbound").await?;
        debug!("inbound message queued: sender={}", key);
        Ok(())
    }

    pub async fn publish_outbound(&mut self, msg: OutboundMessage) -> Result<()> {
        let tx = self.admit_outbound(&msg)?;
        send_bounded(&tx, msg, "outbound").await
    }
}

/// Publish through a shared bus. The lock covers only the rate check, so a
/// full inbound queue never stalls outbound publishers or the reverse.
pub async fn send_inbound(bus: &Mutex<MessageBus>, msg: InboundMessage) -> Result<()> {
    let tx = bus.lock().await.admit_inbound(&msg)?;
    let key = msg.sender_key();
    send_bounded(&tx, msg, "inbound").await?;
    debug!("inbound message queued: sender={}", key);
    Ok(())
}

pub async fn send_outbound(bus: &Mutex<MessageBus>, msg: OutboundMessage) -> Result<()> {
    let tx = bus.lock().await.admit_outbound(&msg)?;
    let chat = format!("{}:{}", msg.channel, msg.chat_id);
    send_bounded(&tx, msg, "outbound").await?;
    debug!("outbound message queued: chat={}", chat);
    Ok(())
}

async fn send_bounded<T>(tx: &mpsc::Sender<T>, msg: T, direction: &str) -> Result<()> {
    match tokio::time::timeout(SEND_TIMEOUT, tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => anyhow::bail!("{} queue closed", direction),
        Err(_) => {
            warn!(
                "{} queue still full after {}s, dropping message",
                direction,
                SEND_TIMEOUT.as_secs()
            );
            anyhow::bail!("{} queue full", direction)
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(
            DEFAULT_RATE_LIMIT,
            DEFAULT_RATE_WINDOW_S,
            DEFAULT_CAPACITY,
            DEFAULT_CAPACITY,
        )
    }
}
