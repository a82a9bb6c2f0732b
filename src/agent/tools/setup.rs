use crate::agent::tools::ToolRegistry;
use crate::agent::tools::clock::CurrentTimeTool;
use crate::agent::tools::mcp::{McpTool, McpToolBridge};
use crate::agent::tools::message::SendMessageTool;
use crate::agent::tools::remember::RememberTool;
use crate::agent::tools::shell::ExecTool;
use crate::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared state needed to construct the built-in tools.
pub struct ToolBuildContext {
    /// Directory `exec` uses when a user has no working directory of their own.
    pub workspace: PathBuf,
    pub exec_timeout: Duration,
    pub storage: Arc<dyn Storage>,
    /// `None` leaves the `mcp` tool out.
    pub mcp: Option<Arc<McpToolBridge>>,
}

/// Register every built-in tool. MCP proxy tools are added later by the bridge.
pub fn register_builtin_tools(registry: &ToolRegistry, ctx: &ToolBuildContext) {
    registry.register_tool(Arc::new(CurrentTimeTool));
    registry.register_tool(Arc::new(SendMessageTool));
    registry.register_tool(Arc::new(RememberTool::new(ctx.storage.clone())));
    registry.register_tool(Arc::new(ExecTool::new(
        ctx.exec_timeout,
        ctx.workspace.clone(),
    )));
    if let Some(bridge) = &ctx.mcp {
        registry.register_tool(Arc::new(McpTool::new(bridge.clone())));
    }
    info!("registered {} built-in tools", registry.len());
}

#[cfg(test)]
mod tests;
