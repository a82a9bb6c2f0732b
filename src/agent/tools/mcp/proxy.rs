use super::ExternalSessionManager;
use crate::agent::tools::base::{ExecutionContext, Tool, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Registry name for a server's tool: `<server>__<tool>`, restricted to the
/// characters model APIs accept.
pub fn exposed_name(server: &str, tool: &str) -> String {
    format!("{}__{}", server, tool)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

/// Forwards calls for one server tool through the session manager.
pub struct McpProxyTool {
    manager: Arc<ExternalSessionManager>,
    server: String,
    remote_name: String,
    name: String,
    description: String,
    input_schema: Value,
    call_timeout: Duration,
}

impl McpProxyTool {
    pub fn new(
        manager: Arc<ExternalSessionManager>,
        server: &str,
        remote_name: String,
        description: String,
        input_schema: Value,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: exposed_name(server, &remote_name),
            manager,
            server: server.to_string(),
            remote_name,
            description,
            input_schema,
            call_timeout,
        }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let result = self
            .manager
            .call_tool(&self.server, &self.remote_name, params, self.call_timeout)
            .await?;
        Ok(result)
    }

    /// Manager enforces the call timeout; leave a little headroom on top.
    fn execution_timeout(&self) -> Option<Duration> {
        Some(self.call_timeout + Duration::from_secs(5))
    }
}
