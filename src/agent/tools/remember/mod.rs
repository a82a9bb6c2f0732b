use crate::agent::tools::base::{ContextField, ExecutionContext, Tool, ToolResult};
use crate::storage::Storage;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on the stored memory blob.
const MAX_INFO_CHARS: usize = 4000;

/// Keeps durable facts about the user in their `info` blob.
pub struct RememberTool {
    storage: Arc<dyn Storage>,
}

impl RememberTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &'static str {
        "remember"
    }

    fn description(&self) -> &'static str {
        "Store a durable fact about the user (name, preferences, ongoing projects). \
         Use mode 'append' to add a fact or 'replace' to rewrite everything remembered."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fact": {
                    "type": "string",
                    "description": "The text to remember"
                },
                "mode": {
                    "type": "string",
                    "enum": ["append", "replace"],
                    "description": "append (default) or replace"
                }
            },
            "required": ["fact"]
        })
    }

    fn context_fields(&self) -> &[ContextField] {
        &[ContextField::UserId]
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let fact = params["fact"]
            .as_str()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'fact' parameter"))?;
        let Some(user_id) = params["user_id"].as_i64() else {
            return Ok(ToolResult::error("No user in this conversation"));
        };
        let replace = params["mode"].as_str() == Some("replace");

        let mut user = self.storage.get_or_create_user(user_id).await?;
        if replace || user.info.is_empty() {
            user.info = fact.to_string();
        } else {
            user.info.push('\n');
            user.info.push_str(fact);
        }
        if user.info.chars().count() > MAX_INFO_CHARS {
            return Ok(ToolResult::error(format!(
                "Memory is full ({} characters max). Use mode 'replace' with a condensed version.",
                MAX_INFO_CHARS
            )));
        }
        self.storage.save_user(&user).await?;
        debug!("remembered {} chars for user {}", fact.len(), user_id);

        Ok(ToolResult::json(&json!({
            "remembered": fact,
            "total_chars": user.info.chars().count(),
        })))
    }
}
