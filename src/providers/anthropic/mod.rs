use crate::providers::base::{
    ChatRequest, FunctionCall, LLMProvider, LLMResponse, Message, MessageCodec, Role, ToolCall,
    ToolDefinition, Usage,
};
use crate::providers::errors::ProviderErrorHandler;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

/// Messages-API wire format.
///
/// System turns become blocks of the top-level `system` field. Tool results
/// ride in `user` messages as `tool_result` blocks, and consecutive user-role
/// messages are merged into one because the API rejects same-role neighbours.
/// Decoding splits every user block back into its own canonical turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicCodec;

impl MessageCodec for AnthropicCodec {
    fn encode(&self, messages: &[Message]) -> Value {
        let mut system = Vec::new();
        let mut native: Vec<Value> = Vec::new();

        for msg in messages {
            let (role, blocks) = match msg.role {
                Role::System => {
                    system.push(json!({"type": "text", "text": msg.content}));
                    continue;
                }
                Role::User => ("user", vec![json!({"type": "text", "text": msg.content})]),
                Role::Tool => (
                    "user",
                    vec![json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content,
                    })],
                ),
                Role::Assistant => ("assistant", assistant_blocks(msg)),
            };

            if role == "user"
                && let Some(last) = native.last_mut()
                && last["role"] == "user"
                && let Some(content) = last["content"].as_array_mut()
            {
                content.extend(blocks);
                continue;
            }
            native.push(json!({"role": role, "content": blocks}));
        }

        let mut out = json!({"messages": native});
        if !system.is_empty() {
            out["system"] = Value::Array(system);
        }
        out
    }

    fn decode(&self, native: &Value) -> Result<Vec<Message>> {
        let mut out = Vec::new();

        match &native["system"] {
            Value::String(s) => out.push(Message::system(s.clone())),
            Value::Array(blocks) => {
                for block in blocks {
                    out.push(Message::system(block["text"].as_str().unwrap_or_default()));
                }
            }
            _ => {}
        }

        let messages = native["messages"]
            .as_array()
            .context("messages-API history must contain a messages array")?;
        for msg in messages {
            match msg["role"].as_str() {
                Some("user") => decode_user(&msg["content"], &mut out),
                Some("assistant") => out.push(decode_assistant(&msg["content"]).0),
                other => anyhow::bail!("unsupported messages-API role {:?}", other),
            }
        }
        Ok(out)
    }
}

fn assistant_blocks(msg: &Message) -> Vec<Value> {
    let mut blocks = Vec::new();
    // The API rejects empty text blocks.
    if !msg.content.is_empty() {
        blocks.push(json!({"type": "text", "text": msg.content}));
    }
    for tc in msg.tool_calls.iter().flatten() {
        blocks.push(json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.function.name,
            "input": arguments_to_input(&tc.function.arguments),
        }));
    }
    blocks
}

/// Objects travel as structured input; anything else is kept verbatim as a string.
fn arguments_to_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(obj @ Value::Object(_)) => obj,
        _ => Value::String(arguments.to_string()),
    }
}

fn input_to_arguments(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

fn decode_user(content: &Value, out: &mut Vec<Message>) {
    match content {
        Value::String(s) => out.push(Message::user(s.clone())),
        Value::Array(blocks) => {
            for block in blocks {
                match block["type"].as_str() {
                    Some("tool_result") => out.push(Message::tool_result(
                        block["tool_use_id"].as_str().unwrap_or_default(),
                        tool_result_text(&block["content"]),
                    )),
                    Some("text") => {
                        out.push(Message::user(block["text"].as_str().unwrap_or_default()));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Returns the canonical assistant turn and any thinking text.
fn decode_assistant(content: &Value) -> (Message, Option<String>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut thinking = None;

    match content {
        Value::String(s) => text.push_str(s),
        Value::Array(blocks) => {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                    Some("tool_use") => calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        function: FunctionCall {
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: input_to_arguments(&block["input"]),
                        },
                    }),
                    Some("thinking") => {
                        thinking = block["thinking"]
                            .as_str()
                            .or_else(|| block["text"].as_str())
                            .map(str::to_string);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    (Message::assistant(text, Some(calls)), thinking)
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<Value> {
    tools
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

pub(crate) fn parse_response(json: &Value) -> LLMResponse {
    let (turn, reasoning_content) = decode_assistant(&json["content"]);
    let usage = Usage {
        input_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };
    LLMResponse {
        content: Some(turn.content).filter(|c| !c.is_empty()),
        tool_calls: turn.tool_calls.unwrap_or_default(),
        reasoning_content,
        usage,
    }
}

pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    api_base: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_base_url(api_key, default_model, DEFAULT_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, default_model: Option<String>, api_base: String) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: super::provider_http_client(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.client = super::provider_http_client_with_timeout(timeout);
        self
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<LLMResponse> {
        let model = req.model.unwrap_or(&self.default_model);
        debug!("anthropic chat: model={}", model);

        let encoded = AnthropicCodec.encode(&req.messages);
        let mut payload = Map::new();
        payload.insert("model".into(), json!(model));
        payload.insert("messages".into(), encoded["messages"].clone());
        payload.insert("max_tokens".into(), json!(req.max_tokens));
        payload.insert("temperature".into(), json!(req.temperature));
        if !encoded["system"].is_null() {
            payload.insert("system".into(), encoded["system"].clone());
        }
        if let Some(tools) = req.tools.filter(|t| !t.is_empty()) {
            payload.insert("tools".into(), Value::Array(convert_tools(tools)));
            let choice = req.tool_choice.as_deref().unwrap_or("auto");
            payload.insert("tool_choice".into(), json!({"type": choice}));
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Value::Object(payload))
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let json = ProviderErrorHandler::check_response(resp, "anthropic").await?;
        let response = parse_response(&json);
        debug!(
            "anthropic chat complete: input_tokens={}, output_tokens={}",
            response.usage.input_tokens, response.usage.output_tokens
        );
        Ok(response)
    }

    async fn available_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/v1/models", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .context("Failed to list Anthropic models")?;
        let json = ProviderErrorHandler::check_response(resp, "anthropic").await?;
        Ok(json["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}
