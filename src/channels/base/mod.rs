use crate::bus::OutboundMessage;
use async_trait::async_trait;

#[async_trait]
pub trait BaseChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}

/// Break `text` into chunks of at most `limit` bytes. Cuts land on the last
/// blank line, line break or space inside the window when there is one, and
/// always on a character boundary.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.trim();
    while rest.len() > limit {
        let (end, resume) = cut_point(rest, limit);
        let chunk = rest[..end].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[resume..].trim_start();
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Where the next chunk ends, and where the one after it starts.
fn cut_point(text: &str, limit: usize) -> (usize, usize) {
    let mut max = limit;
    while !text.is_char_boundary(max) {
        max -= 1;
    }
    if max == 0 {
        // One character wider than the limit goes out on its own.
        let width = text.chars().next().map_or(text.len(), char::len_utf8);
        return (width, width);
    }
    let window = &text[..max];
    for separator in ["\n\n", "\n", " "] {
        if let Some(idx) = window.rfind(separator).filter(|&idx| idx > 0) {
            return (idx, idx + separator.len());
        }
    }
    (max, max)
}
