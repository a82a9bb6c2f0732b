use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

struct Flaky {
    failures_left: AtomicU32,
    delivered: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl BaseChannel for Flaky {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("network hiccup");
        }
        self.delivered
            .lock()
            .unwrap()
            .push(msg.text().unwrap_or_default().to_string());
        Ok(())
    }
}

fn manager(failures: u32) -> (ChannelManager, Arc<std::sync::Mutex<Vec<String>>>) {
    let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));
    let channel = Flaky {
        failures_left: AtomicU32::new(failures),
        delivered: delivered.clone(),
    };
    (ChannelManager::with_channels(vec![Box::new(channel)]), delivered)
}

#[tokio::test(start_paused = true)]
async fn test_send_retries_then_delivers() {
    let (manager, delivered) = manager(2);
    manager
        .send(&OutboundMessage::answer("telegram", 1, "hello"))
        .await;
    assert_eq!(*delivered.lock().unwrap(), vec!["hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_send_gives_up_after_attempts() {
    let (manager, delivered) = manager(5);
    manager
        .send(&OutboundMessage::answer("telegram", 1, "lost"))
        .await;
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_channel_is_dropped() {
    let (manager, delivered) = manager(0);
    manager
        .send(&OutboundMessage::answer("discord", 1, "nope"))
        .await;
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_deliver_outbound_until_closed() {
    let (manager, delivered) = manager(0);
    let (tx, rx) = mpsc::channel(4);
    tx.send(OutboundMessage::answer("telegram", 1, "a")).await.unwrap();
    tx.send(OutboundMessage::answer("telegram", 1, "b")).await.unwrap();
    drop(tx);
    let (_stop_tx, stop_rx) = oneshot::channel();
    deliver_outbound(Arc::new(Mutex::new(manager)), rx, stop_rx).await;
    assert_eq!(*delivered.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_stop_flushes_queued_and_refuses_new() {
    let (manager, delivered) = manager(0);
    let channels = Arc::new(Mutex::new(manager));
    let (tx, rx) = mpsc::channel(4);
    let (stop_tx, stop_rx) = oneshot::channel();

    // Holding the manager keeps the loop from delivering until stop fires.
    let held = channels.lock().await;
    let task = tokio::spawn(deliver_outbound(channels.clone(), rx, stop_rx));
    tx.send(OutboundMessage::answer("telegram", 1, "queued")).await.unwrap();
    stop_tx.send(()).unwrap();
    tokio::task::yield_now().await;
    drop(held);

    // The sender is still alive; the loop ends because the queue was closed.
    task.await.unwrap();
    assert_eq!(*delivered.lock().unwrap(), vec!["queued"]);
    assert!(tx.send(OutboundMessage::answer("telegram", 1, "late")).await.is_err());
}

#[test]
fn test_disabled_telegram_not_built() {
    let config = Config::default();
    let manager = ChannelManager::new(&config, Arc::new(Mutex::new(MessageBus::default())));
    assert!(manager.is_empty());
}
