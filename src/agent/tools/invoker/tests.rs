use super::*;
use crate::agent::tools::base::{ContextField, ToolStatus};
use crate::bus::OutboundSink;
use crate::providers::base::Media;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Echoes its received params; declares whichever context fields it is built with.
struct Mirror {
    fields: Vec<ContextField>,
    calls: AtomicUsize,
}

impl Mirror {
    fn new(fields: Vec<ContextField>) -> Self {
        Self {
            fields,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for Mirror {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn description(&self) -> &'static str {
        "Returns its arguments"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "count": {"type": "integer"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::json(&json!({
            "params": params,
            "has_outbound": ctx.outbound.is_some(),
            "ctx_user": ctx.user_id,
        })))
    }

    fn context_fields(&self) -> &[ContextField] {
        &self.fields
    }
}

struct Misbehaving;

#[async_trait]
impl Tool for Misbehaving {
    fn name(&self) -> &'static str {
        "misbehaving"
    }

    fn description(&self) -> &'static str {
        "Fails in the way its mode argument asks"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"mode": {"type": "string"}}})
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        match params["mode"].as_str().unwrap_or_default() {
            "error" => anyhow::bail!("disk on fire"),
            "panic" => panic!("kaboom"),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolResult::new("woke up"))
            }
            "big" => Ok(ToolResult::new("x".repeat(5000))),
            "soft" => Ok(ToolResult::error("not found")),
            _ => Ok(ToolResult::new("plain text")),
        }
    }

    fn execution_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }
}

#[derive(Default)]
struct RecordingSink {
    answers: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn thoughts(&self, _chat_id: i64, _text: &str) {}

    async fn answer(&self, chat_id: i64, text: &str) {
        self.answers.lock().await.push((chat_id, text.to_string()));
    }

    async fn media(&self, _chat_id: i64, _media: Media) {}
}

fn invoker_with(tools: Vec<Arc<dyn Tool>>) -> (ToolInvoker, Arc<TaskSupervisor>) {
    let registry = Arc::new(ToolRegistry::new());
    for tool in tools {
        registry.register_tool(tool);
    }
    let supervisor = Arc::new(TaskSupervisor::new());
    (
        ToolInvoker::new(registry, supervisor.clone(), Duration::from_secs(30), 1000),
        supervisor,
    )
}

fn call_context(sink: Option<Arc<dyn OutboundSink>>) -> CallContext {
    CallContext {
        user_id: Some(42),
        chat_id: Some(4200),
        working_dir: Some(PathBuf::from("/work/42")),
        outbound: sink,
    }
}

#[tokio::test]
async fn test_ok_result_parsed_as_json() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    let resp = invoker
        .invoke("mirror", r#"{"text":"hi","count":2}"#, &call_context(None))
        .await;
    assert_eq!(resp.status, ToolStatus::Ok);
    assert_eq!(resp.tool_name, "mirror");
    assert_eq!(resp.result["params"], json!({"text": "hi", "count": 2}));
}

#[tokio::test]
async fn test_only_declared_context_is_merged() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![ContextField::UserId]))]);
    let resp = invoker
        .invoke("mirror", r#"{"text":"hi","user_id":1}"#, &call_context(None))
        .await;
    let params = &resp.result["params"];
    assert_eq!(params["user_id"], 42, "context wins over model-supplied value");
    assert!(params.get("chat_id").is_none());
    assert!(params.get("working_dir").is_none());
    assert_eq!(resp.result["ctx_user"], 42);
    assert_eq!(resp.result["has_outbound"], false);
}

#[tokio::test]
async fn test_undeclared_tool_gets_no_context() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    let sink: Arc<dyn OutboundSink> = Arc::new(RecordingSink::default());
    let resp = invoker
        .invoke("mirror", r#"{"text":"hi"}"#, &call_context(Some(sink)))
        .await;
    assert_eq!(resp.result["params"], json!({"text": "hi"}));
    assert_eq!(resp.result["ctx_user"], Value::Null);
    assert_eq!(resp.result["has_outbound"], false);
}

#[tokio::test]
async fn test_declared_outbound_reaches_context_not_arguments() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![
        ContextField::ChatId,
        ContextField::WorkingDir,
        ContextField::Outbound,
    ]))]);
    let sink: Arc<dyn OutboundSink> = Arc::new(RecordingSink::default());
    let resp = invoker
        .invoke("mirror", r#"{"text":"hi"}"#, &call_context(Some(sink)))
        .await;
    assert_eq!(
        resp.result["params"],
        json!({"text": "hi", "chat_id": 4200, "working_dir": "/work/42"})
    );
    assert_eq!(resp.result["has_outbound"], true);
}

#[tokio::test]
async fn test_invalid_json_is_error_response() {
    let mirror = Arc::new(Mirror::new(vec![]));
    let (invoker, _) = invoker_with(vec![mirror.clone()]);
    let resp = invoker.invoke("mirror", "{oops", &call_context(None)).await;
    assert!(resp.is_error());
    assert!(resp.result.as_str().unwrap().contains("Invalid JSON arguments"));
    assert_eq!(mirror.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_object_arguments_rejected() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    let resp = invoker.invoke("mirror", "[1,2]", &call_context(None)).await;
    assert!(resp.is_error());
    assert!(resp.result.as_str().unwrap().contains("got array"));
}

#[tokio::test]
async fn test_schema_violations_reported() {
    let mirror = Arc::new(Mirror::new(vec![]));
    let (invoker, _) = invoker_with(vec![mirror.clone()]);

    let missing = invoker.invoke("mirror", "{}", &call_context(None)).await;
    assert!(missing.is_error());
    assert!(
        missing
            .result
            .as_str()
            .unwrap()
            .contains("missing required parameter 'text'")
    );

    let wrong = invoker
        .invoke("mirror", r#"{"text":"a","count":1.5}"#, &call_context(None))
        .await;
    assert!(wrong.result.as_str().unwrap().contains("should be integer"));
    assert_eq!(mirror.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_tool_is_error_response() {
    let (invoker, _) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    let resp = invoker
        .invoke("does_not_exist", r#"{"x":1}"#, &call_context(None))
        .await;
    assert!(resp.is_error());
    assert_eq!(resp.tool_name, "does_not_exist");
    let message = resp.result.as_str().unwrap();
    assert!(message.contains("Unknown tool"));
    assert!(message.contains("mirror"));
}

#[tokio::test]
async fn test_executor_error_becomes_response() {
    let (invoker, _) = invoker_with(vec![Arc::new(Misbehaving)]);
    let resp = invoker
        .invoke("misbehaving", r#"{"mode":"error"}"#, &call_context(None))
        .await;
    assert!(resp.is_error());
    assert_eq!(resp.result, json!("disk on fire"));

    let soft = invoker
        .invoke("misbehaving", r#"{"mode":"soft"}"#, &call_context(None))
        .await;
    assert_eq!(soft.result, json!("not found"));
}

#[tokio::test]
async fn test_panic_becomes_response() {
    let (invoker, _) = invoker_with(vec![Arc::new(Misbehaving)]);
    let resp = invoker
        .invoke("misbehaving", r#"{"mode":"panic"}"#, &call_context(None))
        .await;
    assert!(resp.is_error());
    assert!(resp.result.as_str().unwrap().contains("crashed: kaboom"));

    // The invoker is still usable afterwards
    let after = invoker
        .invoke("misbehaving", "{}", &call_context(None))
        .await;
    assert_eq!(after.result, json!("plain text"));
}

#[tokio::test(start_paused = true)]
async fn test_per_tool_timeout_enforced() {
    let (invoker, _) = invoker_with(vec![Arc::new(Misbehaving)]);
    let resp = invoker
        .invoke("misbehaving", r#"{"mode":"hang"}"#, &call_context(None))
        .await;
    assert!(resp.is_error());
    assert!(resp.result.as_str().unwrap().contains("timed out after 5s"));
}

#[tokio::test]
async fn test_large_results_truncated() {
    let (invoker, _) = invoker_with(vec![Arc::new(Misbehaving)]);
    let resp = invoker
        .invoke("misbehaving", r#"{"mode":"big"}"#, &call_context(None))
        .await;
    let text = resp.result.as_str().unwrap();
    assert!(text.len() < 1100);
    assert!(text.contains("[truncated - showed"));
}

#[tokio::test]
async fn test_background_flag_returns_immediately_and_delivers() {
    let (invoker, supervisor) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn OutboundSink> = sink.clone();

    let resp = invoker
        .invoke(
            "mirror",
            r#"{"text":"later","run_in_background":true}"#,
            &call_context(Some(dyn_sink)),
        )
        .await;
    assert_eq!(resp.status, ToolStatus::Ok);
    assert_eq!(resp.result, json!("started in background"));
    assert!(resp.additional_details.unwrap().get("task_id").is_some());

    supervisor.shutdown(Duration::from_secs(5)).await;
    let answers = sink.answers.lock().await;
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].0, 4200);
    assert!(answers[0].1.contains("later"));
    assert!(!answers[0].1.contains("run_in_background"));
}

#[tokio::test]
async fn test_background_refused_after_shutdown() {
    let (invoker, supervisor) = invoker_with(vec![Arc::new(Mirror::new(vec![]))]);
    supervisor.shutdown(Duration::from_millis(10)).await;
    let resp = invoker
        .invoke(
            "mirror",
            r#"{"text":"x","run_in_background":true}"#,
            &call_context(None),
        )
        .await;
    assert!(resp.is_error());
}

#[test]
fn test_validate_accepts_unknown_types_and_nulls() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "custom"}, "b": {"type": "string"}}
    });
    assert!(validate_tool_params("t", &schema, &json!({"a": 1, "b": null})).is_none());
}
