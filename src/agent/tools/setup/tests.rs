use super::*;
use crate::agent::tools::mcp::{ExternalSessionManager, RmcpConnector};
use crate::config::McpConfig;
use crate::storage::MemoryStorage;

fn context(mcp: Option<Arc<McpToolBridge>>) -> ToolBuildContext {
    ToolBuildContext {
        workspace: std::env::temp_dir(),
        exec_timeout: Duration::from_secs(30),
        storage: Arc::new(MemoryStorage::new()),
        mcp,
    }
}

#[test]
fn test_registers_builtins_without_mcp() {
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry, &context(None));
    assert_eq!(
        registry.tool_names(),
        vec!["current_time", "exec", "remember", "send_message"]
    );
}

#[test]
fn test_registers_mcp_tool_with_bridge() {
    let registry = Arc::new(ToolRegistry::new());
    let manager = Arc::new(ExternalSessionManager::new(Arc::new(RmcpConnector)));
    let bridge = Arc::new(McpToolBridge::new(
        manager,
        registry.clone(),
        &McpConfig::default(),
    ));
    register_builtin_tools(&registry, &context(Some(bridge)));
    assert!(registry.contains("mcp"));
    assert_eq!(registry.definitions().len(), 5);
}
