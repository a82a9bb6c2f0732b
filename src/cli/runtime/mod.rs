//! Composition root: builds every long-lived component once and hands them
//! out by `Arc`.
use crate::agent::tools::invoker::ToolInvoker;
use crate::agent::tools::mcp::{ExternalSessionManager, McpToolBridge, SessionConnector};
use crate::agent::tools::{ToolBuildContext, ToolRegistry, register_builtin_tools};
use crate::agent::{ConversationEngine, Dispatcher, DispatcherSettings, EngineSettings};
use crate::bus::OutboundSink;
use crate::config::Config;
use crate::providers::ProviderRegistry;
use crate::storage::Storage;
use crate::utils::expand_home;
use crate::utils::task_supervisor::TaskSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Runtime {
    pub storage: Arc<dyn Storage>,
    pub providers: Arc<ProviderRegistry>,
    pub supervisor: Arc<TaskSupervisor>,
    pub tools: Arc<ToolRegistry>,
    pub bridge: Arc<McpToolBridge>,
    pub engine: Arc<ConversationEngine>,
    dispatcher_settings: DispatcherSettings,
    grace: Duration,
}

impl Runtime {
    pub fn build(
        config: &Config,
        storage: Arc<dyn Storage>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        let providers = Arc::new(ProviderRegistry::new(config));
        let supervisor = Arc::new(TaskSupervisor::new());
        let tools = Arc::new(ToolRegistry::new());

        let sessions = Arc::new(ExternalSessionManager::new(connector));
        let bridge = Arc::new(McpToolBridge::new(sessions, tools.clone(), &config.mcp));

        let agent = &config.agent;
        register_builtin_tools(
            &tools,
            &ToolBuildContext {
                workspace: expand_home(&agent.workspace),
                exec_timeout: Duration::from_secs(agent.tool_timeout_secs),
                storage: storage.clone(),
                mcp: Some(bridge.clone()),
            },
        );

        let invoker = Arc::new(ToolInvoker::new(
            tools.clone(),
            supervisor.clone(),
            Duration::from_secs(agent.tool_timeout_secs),
            agent.max_tool_result_chars,
        ));
        let engine = Arc::new(ConversationEngine::new(
            invoker,
            EngineSettings::from_config(agent),
        ));
        debug!(
            "runtime built: provider {}, {} tools",
            providers.default_provider(),
            tools.len()
        );

        Self {
            storage,
            providers,
            supervisor,
            tools,
            bridge,
            engine,
            dispatcher_settings: DispatcherSettings::from_config(agent),
            grace: Duration::from_secs(config.tasks.shutdown_grace_secs),
        }
    }

    /// A dispatcher that replies through `sink`.
    pub fn dispatcher(&self, sink: Arc<dyn OutboundSink>) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            self.storage.clone(),
            self.providers.clone(),
            self.engine.clone(),
            sink,
            self.dispatcher_settings.clone(),
        ))
    }

    /// Close every external session, then drain background work within the
    /// configured grace period.
    pub async fn shutdown(&self) {
        self.bridge.detach_all().await;
        self.supervisor.shutdown(self.grace).await;
        info!("runtime shut down");
    }
}
