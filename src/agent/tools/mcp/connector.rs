use crate::agent::tools::base::ToolResult;
use crate::config::McpTransport;
use crate::utils::subprocess::scrubbed_command;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, RawContent};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How to reach an external tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> McpTransport {
        match self {
            Self::Stdio { .. } => McpTransport::Stdio,
            Self::Sse { .. } => McpTransport::Sse,
        }
    }
}

/// A tool as advertised by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// An open protocol session. Shared between the owning task and callers.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<ToolResult>;

    /// Resolves once the peer has gone away.
    async fn closed(&self);

    /// Release the session. Called exactly once, by the owning task.
    async fn close(&self) -> Result<()>;
}

/// Opens transports and protocol sessions on top of them.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, name: &str, spec: &TransportSpec) -> Result<Arc<dyn ProtocolSession>>;
}

/// Production connector backed by `rmcp`: child processes for stdio, the
/// streamable HTTP client for URL-based servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpConnector;

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn open(&self, name: &str, spec: &TransportSpec) -> Result<Arc<dyn ProtocolSession>> {
        let service = match spec {
            TransportSpec::Stdio { command, args, env } => {
                for key in env.keys() {
                    let lower = key.to_lowercase();
                    if ["key", "secret", "token", "password"]
                        .iter()
                        .any(|needle| lower.contains(needle))
                    {
                        debug!("MCP server '{}' receives credential-like env var '{}'", name, key);
                    }
                }
                let mut cmd = scrubbed_command(command, env);
                cmd.args(args);
                // stdin/stdout carry the protocol, stderr goes to our log
                cmd.stdin(std::process::Stdio::piped());
                cmd.stdout(std::process::Stdio::piped());
                cmd.stderr(std::process::Stdio::inherit());
                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("Failed to spawn '{}'", command))?;
                ().serve(transport)
                    .await
                    .map_err(|e| anyhow::anyhow!("MCP handshake failed: {}", e))?
            }
            TransportSpec::Sse { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport)
                    .await
                    .map_err(|e| anyhow::anyhow!("MCP handshake with {} failed: {}", url, e))?
            }
        };
        Ok(Arc::new(RmcpSession::new(service)))
    }
}

struct RmcpSession {
    peer: Peer<RoleClient>,
    /// Taken by `closed()` to wait on; dropping it cancels the service.
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpSession {
    fn new(service: RunningService<RoleClient, ()>) -> Self {
        Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl ProtocolSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("list_tools failed: {}", e))?;
        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.as_deref().unwrap_or("").to_string(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<ToolResult> {
        let request = CallToolRequestParams::new(tool.to_string()).with_arguments(arguments);
        let result = self
            .peer
            .call_tool(request)
            .await
            .map_err(|e| anyhow::anyhow!("MCP tool '{}' call failed: {}", tool, e))?;

        let mut output = String::new();
        for content in &result.content {
            if !output.is_empty() {
                output.push('\n');
            }
            match &content.raw {
                RawContent::Text(text) => output.push_str(&text.text),
                RawContent::Image(img) => {
                    let _ = write!(output, "[Image: {} ({} bytes)]", img.mime_type, img.data.len());
                }
                RawContent::Audio(audio) => {
                    let _ = write!(
                        output,
                        "[Audio: {} ({} bytes)]",
                        audio.mime_type,
                        audio.data.len()
                    );
                }
                _ => output.push_str("[Unsupported MCP content type]"),
            }
        }
        if output.is_empty() {
            output = "(no output)".to_string();
        }

        if result.is_error.unwrap_or(false) {
            Ok(ToolResult::error(output))
        } else {
            Ok(ToolResult::new(output))
        }
    }

    async fn closed(&self) {
        let service = self.service.lock().await.take();
        match service {
            Some(service) => {
                if let Err(e) = service.waiting().await {
                    warn!("MCP service task ended abnormally: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn close(&self) -> Result<()> {
        // If `closed()` was dropped mid-wait the service went with it and is already cancelled
        if let Some(service) = self.service.lock().await.take() {
            service
                .cancel()
                .await
                .map_err(|e| anyhow::anyhow!("MCP shutdown failed: {}", e))?;
        }
        Ok(())
    }
}
