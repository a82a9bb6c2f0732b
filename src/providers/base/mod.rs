use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string()),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parsed arguments. Empty or whitespace-only strings count as `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Result<Value> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

/// One canonical conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by storage on persist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            expire_at: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            tool_calls: tool_calls.filter(|calls| !calls.is_empty()),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
    /// Inactive definitions stay registered but are not offered to the model.
    #[serde(default = "default_true")]
    pub register: bool,
    #[serde(default)]
    pub run_in_background_by_default: bool,
}

fn default_true() -> bool {
    true
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            register: true,
            run_in_background_by_default: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Thinking text from reasoning models, shown to the user when enabled.
    pub reasoning_content: Option<String>,
    pub usage: Usage,
}

impl LLMResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// No text and no tool calls: nothing the conversation can continue from.
    pub fn is_empty(&self) -> bool {
        !self.has_tool_calls() && self.content.as_deref().is_none_or(|c| c.trim().is_empty())
    }
}

/// Parameters for a chat request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub model: Option<&'a str>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Tool choice mode: "auto" (default), "any" (force tool use), or "none".
    pub tool_choice: Option<String>,
}

/// Generated media returned by image or speech endpoints.
#[derive(Debug, Clone)]
pub enum Media {
    Image { url: Option<String>, data: Option<Vec<u8>> },
    Audio { data: Vec<u8>, mime_type: String },
}

/// Lossless translation between canonical turns and a provider's native format.
///
/// `decode(encode(m))` reproduces `m` in role, content, tool calls and tool call id.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, messages: &[Message]) -> Value;
    fn decode(&self, native: &Value) -> anyhow::Result<Vec<Message>>;
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Short lowercase identifier used in config and user selections.
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse>;

    async fn available_models(&self) -> anyhow::Result<Vec<String>>;

    async fn api_key_is_valid(&self) -> bool {
        self.available_models().await.is_ok()
    }

    async fn images(&self, _prompt: &str, _model: Option<&str>) -> anyhow::Result<Vec<Media>> {
        Err(unsupported(self.name(), "image generation"))
    }

    async fn speech(&self, _text: &str, _voice: &str, _model: Option<&str>) -> anyhow::Result<Media> {
        Err(unsupported(self.name(), "speech"))
    }

    async fn transcribe(&self, _audio: Vec<u8>, _model: Option<&str>) -> anyhow::Result<String> {
        Err(unsupported(self.name(), "transcription"))
    }
}

fn unsupported(provider: &str, capability: &str) -> anyhow::Error {
    crate::errors::ParleyError::Config(format!(
        "{} does not support {}. Select another provider with /model.",
        provider, capability
    ))
    .into()
}

#[cfg(test)]
mod tests;
