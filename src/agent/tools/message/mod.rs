use crate::agent::tools::base::{ContextField, ExecutionContext, Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Sends a message to the current chat immediately, ahead of the final answer.
pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &'static str {
        "send_message"
    }

    fn description(&self) -> &'static str {
        "Send a message to the user right away, before the final answer. \
         Useful for progress updates during long tasks."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send"
                }
            },
            "required": ["content"]
        })
    }

    fn context_fields(&self) -> &[ContextField] {
        &[ContextField::ChatId, ContextField::Outbound]
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let content = params["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'content' parameter"))?;

        let (Some(chat_id), Some(outbound)) = (ctx.chat_id, ctx.outbound.as_ref()) else {
            return Ok(ToolResult::error("Error: No chat to send to"));
        };
        outbound.answer(chat_id, content).await;
        Ok(ToolResult::new(format!("Message sent to chat {}", chat_id)))
    }
}

#[cfg(test)]
mod tests;
