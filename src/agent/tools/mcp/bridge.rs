use super::{CONNECT_GRACE, ExternalSessionManager, LIST_TOOLS_TIMEOUT, McpProxyTool, TransportSpec};
use crate::agent::tools::base::Tool;
use crate::agent::tools::registry::ToolRegistry;
use crate::config::{McpConfig, McpServerConfig, McpTransport};
use crate::errors::{ParleyError, ParleyResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Connects sessions and keeps the tool registry in step with them.
pub struct McpToolBridge {
    manager: Arc<ExternalSessionManager>,
    registry: Arc<ToolRegistry>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl McpToolBridge {
    pub fn new(
        manager: Arc<ExternalSessionManager>,
        registry: Arc<ToolRegistry>,
        config: &McpConfig,
    ) -> Self {
        let weak = Arc::downgrade(&registry);
        manager.on_peer_closed(Arc::new(move |name: &str, tools: &HashSet<String>| {
            if let Some(registry) = weak.upgrade() {
                registry.deregister(tools);
                info!(
                    "MCP server '{}' went away, removed {} tools",
                    name,
                    tools.len()
                );
            }
        }));
        Self {
            manager,
            registry,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    pub fn manager(&self) -> &Arc<ExternalSessionManager> {
        &self.manager
    }

    /// Longest an `attach` can take: connect, grace, then tool listing.
    pub fn attach_budget(&self) -> Duration {
        self.connect_timeout + CONNECT_GRACE + LIST_TOOLS_TIMEOUT
    }

    /// Connect and register every tool the server offers. Returns the
    /// registered names. A session whose tools cannot be listed is torn down.
    pub async fn attach(&self, name: &str, spec: TransportSpec) -> ParleyResult<Vec<String>> {
        let handle = self.manager.connect(name, spec, self.connect_timeout).await?;

        let existing = self.manager.tools_of(name);
        if !existing.is_empty() {
            let mut names: Vec<String> = existing.into_iter().collect();
            names.sort();
            return Ok(names);
        }

        let descriptors = match self.manager.list_tools(&handle.name).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!("MCP server '{}' tool listing failed, disconnecting: {}", name, e);
                self.manager.disconnect(name).await;
                return Err(e);
            }
        };

        let mut registered = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let proxy = McpProxyTool::new(
                self.manager.clone(),
                name,
                descriptor.name,
                descriptor.description,
                descriptor.input_schema,
                self.call_timeout,
            );
            let definition = proxy.definition();
            let exposed = definition.name.clone();
            self.registry.register(definition, Arc::new(proxy));
            registered.push(exposed);
        }
        registered.sort();

        let owned: HashSet<String> = registered.iter().cloned().collect();
        if !self.manager.set_tools(name, owned.clone()) {
            self.registry.deregister(&owned);
            return Err(ParleyError::Connection {
                session: name.to_string(),
                message: "session closed while its tools were being registered".to_string(),
            });
        }
        info!(
            "MCP server '{}' attached with {} tools",
            name,
            registered.len()
        );
        Ok(registered)
    }

    /// Disconnect and drop the server's tools from the registry.
    pub async fn detach(&self, name: &str) -> Vec<String> {
        let tools = self.manager.disconnect(name).await;
        self.registry.deregister(&tools);
        let mut names: Vec<String> = tools.into_iter().collect();
        names.sort();
        names
    }

    /// Attach every enabled configured server. Failures are logged and skipped.
    pub async fn attach_configured(&self, config: &McpConfig) -> usize {
        let mut attached = 0;
        for (name, server) in &config.servers {
            if !server.enabled {
                info!("MCP server '{}' is disabled, skipping", name);
                continue;
            }
            let spec = match spec_from_config(name, server) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("MCP server '{}' misconfigured: {}", name, e);
                    continue;
                }
            };
            match self.attach(name, spec).await {
                Ok(_) => attached += 1,
                Err(e) => warn!("failed to attach MCP server '{}': {}", name, e),
            }
        }
        attached
    }

    /// Detach everything; used on shutdown.
    pub async fn detach_all(&self) {
        let tools = self.manager.shutdown().await;
        self.registry.deregister(&tools);
    }
}

pub fn spec_from_config(name: &str, server: &McpServerConfig) -> ParleyResult<TransportSpec> {
    match server.transport {
        McpTransport::Stdio if server.command.is_empty() => Err(ParleyError::Config(format!(
            "mcp.servers.{} needs a command",
            name
        ))),
        McpTransport::Stdio => Ok(TransportSpec::Stdio {
            command: server.command.clone(),
            args: server.args.clone(),
            env: server.env.clone(),
        }),
        McpTransport::Sse => server
            .url
            .clone()
            .map(|url| TransportSpec::Sse { url })
            .ok_or_else(|| ParleyError::Config(format!("mcp.servers.{} needs a url", name))),
    }
}
