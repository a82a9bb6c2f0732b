use super::{McpToolBridge, TransportSpec};
use crate::agent::tools::base::{ExecutionContext, Tool, ToolResult};
use crate::utils::regex::RegexPatterns;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Lets the model connect and disconnect external tool servers at runtime.
pub struct McpTool {
    bridge: Arc<McpToolBridge>,
}

impl McpTool {
    pub fn new(bridge: Arc<McpToolBridge>) -> Self {
        Self { bridge }
    }

    fn server_name(params: &Value) -> Result<String> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'name' parameter"))?;
        if !RegexPatterns::identifier().is_match(name) {
            anyhow::bail!("Server name must be 1-64 characters of letters, digits, '_' or '-'");
        }
        Ok(name.to_string())
    }

    async fn attach(&self, name: &str, spec: TransportSpec) -> ToolResult {
        match self.bridge.attach(name, spec).await {
            Ok(tools) => ToolResult::json(&json!({"server": name, "tools": tools})),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &'static str {
        "mcp"
    }

    fn description(&self) -> &'static str {
        "Manage external MCP tool servers. Actions: connect_stdio (launch a local server \
         process), connect_sse (connect to a server URL), disconnect, list. Connected \
         servers' tools become available as '<server>__<tool>'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["connect_stdio", "connect_sse", "disconnect", "list"]
                },
                "name": {
                    "type": "string",
                    "description": "Server name, used as the tool name prefix"
                },
                "command": {
                    "type": "string",
                    "description": "Executable for connect_stdio"
                },
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Arguments for connect_stdio"
                },
                "env": {
                    "type": "object",
                    "description": "Extra environment variables for connect_stdio"
                },
                "url": {
                    "type": "string",
                    "description": "Server URL for connect_sse"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let action = params["action"].as_str().unwrap_or_default();
        match action {
            "connect_stdio" => {
                let name = Self::server_name(&params)?;
                let command = params["command"]
                    .as_str()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("connect_stdio needs 'command'"))?;
                let args: Vec<String> = params["args"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|a| a.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let env: HashMap<String, String> = params["env"]
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                let spec = TransportSpec::Stdio {
                    command: command.to_string(),
                    args,
                    env,
                };
                Ok(self.attach(&name, spec).await)
            }
            "connect_sse" => {
                let name = Self::server_name(&params)?;
                let url = params["url"]
                    .as_str()
                    .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
                    .ok_or_else(|| anyhow::anyhow!("connect_sse needs an http(s) 'url'"))?;
                let spec = TransportSpec::Sse {
                    url: url.to_string(),
                };
                Ok(self.attach(&name, spec).await)
            }
            "disconnect" => {
                let name = Self::server_name(&params)?;
                let removed = self.bridge.detach(&name).await;
                Ok(ToolResult::json(&json!({"server": name, "removed_tools": removed})))
            }
            "list" => {
                let manager = self.bridge.manager();
                let servers: Vec<Value> = manager
                    .names()
                    .into_iter()
                    .map(|name| {
                        let mut tools: Vec<String> = manager.tools_of(&name).into_iter().collect();
                        tools.sort();
                        let state = manager
                            .state(&name)
                            .map(|s| format!("{:?}", s).to_lowercase());
                        json!({"name": name, "state": state, "tools": tools})
                    })
                    .collect();
                Ok(ToolResult::json(&json!({"servers": servers})))
            }
            other => Ok(ToolResult::error(format!("Unknown action '{}'", other))),
        }
    }

    fn execution_timeout(&self) -> Option<Duration> {
        Some(self.bridge.attach_budget())
    }
}
