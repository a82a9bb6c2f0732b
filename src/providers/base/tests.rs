use super::*;
use serde_json::json;

#[test]
fn message_assistant_with_tool_calls() {
    let tc = vec![ToolCall::new("tc1", "weather", &json!({"city": "NYC"}))];
    let msg = Message::assistant("thinking", Some(tc));
    assert_eq!(msg.role, Role::Assistant);
    assert_eq!(msg.content, "thinking");
    assert_eq!(msg.tool_calls.as_ref().unwrap().len(), 1);
    assert_eq!(
        msg.tool_calls.unwrap()[0].function.arguments,
        r#"{"city":"NYC"}"#
    );
}

#[test]
fn message_assistant_drops_empty_tool_call_list() {
    let msg = Message::assistant("hi", Some(vec![]));
    assert!(msg.tool_calls.is_none());
    assert!(!msg.has_tool_calls());
}

#[test]
fn message_tool_result() {
    let msg = Message::tool_result("tc1", "result data");
    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.content, "result data");
    assert_eq!(msg.tool_call_id.as_deref(), Some("tc1"));
}

#[test]
fn message_expiry() {
    let now = Utc::now();
    let mut msg = Message::user("hello");
    assert!(!msg.is_expired(now));
    msg.expire_at = Some(now - chrono::Duration::seconds(1));
    assert!(msg.is_expired(now));
    msg.expire_at = Some(now + chrono::Duration::seconds(60));
    assert!(!msg.is_expired(now));
}

#[test]
fn message_serde_skips_empty_fields() {
    let json = serde_json::to_value(Message::user("hi")).unwrap();
    assert_eq!(json, json!({"role": "user", "content": "hi"}));
    let back: Message = serde_json::from_value(json).unwrap();
    assert_eq!(back, Message::user("hi"));
}

#[test]
fn role_parse_round_trip() {
    for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
        assert_eq!(Role::parse(role.as_str()), Some(role));
    }
    assert_eq!(Role::parse("developer"), None);
}

#[test]
fn tool_call_parsed_arguments() {
    let tc = ToolCall::new("1", "calc", &json!({"expr": "2+2"}));
    assert_eq!(tc.parsed_arguments().unwrap()["expr"], "2+2");

    let blank = ToolCall {
        id: "2".into(),
        function: FunctionCall {
            name: "noop".into(),
            arguments: "  ".into(),
        },
    };
    assert_eq!(blank.parsed_arguments().unwrap(), json!({}));

    let broken = ToolCall {
        id: "3".into(),
        function: FunctionCall {
            name: "noop".into(),
            arguments: "{not json".into(),
        },
    };
    assert!(broken.parsed_arguments().is_err());
}

#[test]
fn llm_response_emptiness() {
    let blank = LLMResponse {
        content: Some("   ".into()),
        ..Default::default()
    };
    assert!(blank.is_empty());

    let text = LLMResponse {
        content: Some("hi".into()),
        ..Default::default()
    };
    assert!(!text.is_empty());

    let tools_only = LLMResponse {
        tool_calls: vec![ToolCall::new("1", "test", &json!({}))],
        ..Default::default()
    };
    assert!(tools_only.has_tool_calls());
    assert!(!tools_only.is_empty());
}

#[test]
fn tool_definition_defaults_to_registered() {
    let def: ToolDefinition = serde_json::from_value(json!({
        "name": "t",
        "description": "d",
        "parameters": {"type": "object"}
    }))
    .unwrap();
    assert!(def.register);
    assert!(!def.run_in_background_by_default);
}

struct NoopProvider;

#[async_trait]
impl LLMProvider for NoopProvider {
    fn name(&self) -> &'static str {
        "noop"
    }
    fn default_model(&self) -> &'static str {
        "noop-1"
    }
    async fn chat(&self, _req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        Ok(LLMResponse {
            content: Some("ok".into()),
            ..Default::default()
        })
    }
    async fn available_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["noop-1".into()])
    }
}

#[tokio::test]
async fn default_api_key_check_uses_model_listing() {
    assert!(NoopProvider.api_key_is_valid().await);
}

#[tokio::test]
async fn optional_modalities_default_to_config_error() {
    let err = NoopProvider.images("a cat", None).await.unwrap_err();
    let typed = err.downcast_ref::<crate::errors::ParleyError>().unwrap();
    assert!(matches!(typed, crate::errors::ParleyError::Config(m) if m.contains("image")));
    assert!(NoopProvider.transcribe(vec![1, 2], None).await.is_err());
    assert!(NoopProvider.speech("hi", "alloy", None).await.is_err());
}
