use crate::bus::OutboundSink;
use crate::providers::base::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::new(value.to_string())
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// Call-scoped values a tool may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    UserId,
    ChatId,
    WorkingDir,
    /// Handle for sending messages to the current chat. Never merged into arguments.
    Outbound,
}

impl ContextField {
    /// Argument key the field is merged under, if it is merged at all.
    pub fn argument_key(self) -> Option<&'static str> {
        match self {
            Self::UserId => Some("user_id"),
            Self::ChatId => Some("chat_id"),
            Self::WorkingDir => Some("working_dir"),
            Self::Outbound => None,
        }
    }
}

/// Everything the conversation loop knows about the current call.
#[derive(Clone, Default)]
pub struct CallContext {
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub working_dir: Option<PathBuf>,
    pub outbound: Option<Arc<dyn OutboundSink>>,
}

impl CallContext {
    /// The subset of this context a tool declared it needs.
    pub fn scoped(&self, fields: &[ContextField]) -> ExecutionContext {
        let wants = |f: ContextField| fields.contains(&f);
        ExecutionContext {
            user_id: self.user_id.filter(|_| wants(ContextField::UserId)),
            chat_id: self.chat_id.filter(|_| wants(ContextField::ChatId)),
            working_dir: self
                .working_dir
                .clone()
                .filter(|_| wants(ContextField::WorkingDir)),
            outbound: self
                .outbound
                .clone()
                .filter(|_| wants(ContextField::Outbound)),
        }
    }

    /// Value a context field contributes to the argument object.
    pub fn argument_value(&self, field: ContextField) -> Option<Value> {
        match field {
            ContextField::UserId => self.user_id.map(Value::from),
            ContextField::ChatId => self.chat_id.map(Value::from),
            ContextField::WorkingDir => self
                .working_dir
                .as_ref()
                .map(|p| Value::from(p.display().to_string())),
            ContextField::Outbound => None,
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("user_id", &self.user_id)
            .field("chat_id", &self.chat_id)
            .field("working_dir", &self.working_dir)
            .field("outbound", &self.outbound.is_some())
            .finish()
    }
}

/// Context handed to a tool's `execute`, filtered to the fields it declared.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub working_dir: Option<PathBuf>,
    pub outbound: Option<Arc<dyn OutboundSink>>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value; // JSON Schema

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult>;

    /// Context this tool wants merged into its arguments or execution context.
    fn context_fields(&self) -> &[ContextField] {
        &[]
    }

    fn run_in_background_by_default(&self) -> bool {
        false
    }

    /// Per-tool execution timeout. `None` uses the invoker default.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            run_in_background_by_default: self.run_in_background_by_default(),
            ..ToolDefinition::new(self.name(), self.description(), self.parameters())
        }
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Uniform outcome of every tool invocation; serialized as the tool turn's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub tool_name: String,
    pub status: ToolStatus,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_details: Option<Value>,
}

impl ToolResponse {
    pub fn ok(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Ok,
            result,
            additional_details: None,
        }
    }

    pub fn error(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Error,
            result: Value::String(message.into()),
            additional_details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.additional_details = Some(details);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// JSON text for the tool turn.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"tool_name":"{}","status":"error","result":"unserializable result"}}"#,
                self.tool_name
            )
        })
    }
}
