use super::*;
use crate::bus::OutboundSink;
use crate::providers::base::Media;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl OutboundSink for Recorder {
    async fn thoughts(&self, _chat_id: i64, _text: &str) {}

    async fn answer(&self, chat_id: i64, text: &str) {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
    }

    async fn media(&self, _chat_id: i64, _media: Media) {}
}

#[tokio::test]
async fn test_missing_content_param() {
    let result = SendMessageTool
        .execute(serde_json::json!({}), &ExecutionContext::default())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_without_chat_returns_error() {
    let result = SendMessageTool
        .execute(
            serde_json::json!({"content": "hello"}),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert!(result.is_error);
    assert!(result.content.contains("No chat"));
}

#[tokio::test]
async fn test_sends_to_context_chat() {
    let recorder = Arc::new(Recorder::default());
    let ctx = ExecutionContext {
        chat_id: Some(99),
        outbound: Some(recorder.clone()),
        ..ExecutionContext::default()
    };
    let result = SendMessageTool
        .execute(serde_json::json!({"content": "working on it"}), &ctx)
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(
        *recorder.sent.lock().unwrap(),
        vec![(99, "working on it".to_string())]
    );
}
