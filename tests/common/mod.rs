// Shared test helpers — not all items used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use parley::agent::tools::{ExecutionContext, Tool, ToolInvoker, ToolRegistry, ToolResult};
use parley::agent::{ConversationEngine, Dispatcher, DispatcherSettings, EngineSettings};
use parley::bus::OutboundSink;
use parley::config::Config;
use parley::providers::ProviderRegistry;
use parley::providers::base::{
    ChatRequest, LLMProvider, LLMResponse, Media, Message, ToolCall, ToolDefinition, Usage,
};
use parley::storage::{MemoryStorage, Storage};
use parley::utils::task_supervisor::TaskSupervisor;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Replays queued responses; an exhausted queue answers with empty responses.
pub struct MockLLMProvider {
    responses: Mutex<VecDeque<anyhow::Result<LLMResponse>>>,
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
    /// Simulated latency of every request.
    pub delay: Duration,
}

impl MockLLMProvider {
    pub fn with_responses(responses: Vec<anyhow::Result<LLMResponse>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: req.messages,
            model: req.model.map(str::to_string),
            tools: req.tools,
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(LLMResponse::default()))
    }

    async fn available_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["mock-model".to_string()])
    }
}

// --- Response builders ---

pub fn text_response(content: &str) -> anyhow::Result<LLMResponse> {
    Ok(LLMResponse {
        content: Some(content.to_string()),
        usage: Usage {
            input_tokens: 12,
            output_tokens: 4,
        },
        ..LLMResponse::default()
    })
}

pub fn tool_response(calls: Vec<ToolCall>) -> anyhow::Result<LLMResponse> {
    Ok(LLMResponse {
        tool_calls: calls,
        usage: Usage {
            input_tokens: 12,
            output_tokens: 4,
        },
        ..LLMResponse::default()
    })
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, &arguments)
}

// --- Tools ---

/// Returns a fixed string; records the arguments it saw.
pub struct CannedTool {
    pub name: &'static str,
    pub output: &'static str,
    pub seen: Mutex<Vec<Value>>,
}

impl CannedTool {
    pub fn new(name: &'static str, output: &'static str) -> Self {
        Self {
            name,
            output,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "canned"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        self.seen.lock().unwrap().push(params);
        Ok(ToolResult::new(self.output))
    }
}

// --- Sinks ---

#[derive(Default)]
pub struct RecordingSink {
    pub answers: Mutex<Vec<(i64, String)>>,
    pub thoughts: Mutex<Vec<(i64, String)>>,
}

impl RecordingSink {
    pub fn answer_texts(&self) -> Vec<String> {
        self.answers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn thoughts(&self, chat_id: i64, text: &str) {
        self.thoughts.lock().unwrap().push((chat_id, text.to_string()));
    }

    async fn answer(&self, chat_id: i64, text: &str) {
        self.answers.lock().unwrap().push((chat_id, text.to_string()));
    }

    async fn media(&self, _chat_id: i64, _media: Media) {}
}

// --- Constructors ---

pub fn engine_with(
    tools: Vec<Arc<dyn Tool>>,
    settings: EngineSettings,
) -> (ConversationEngine, Arc<TaskSupervisor>) {
    let registry = Arc::new(ToolRegistry::new());
    for tool in tools {
        registry.register_tool(tool);
    }
    let supervisor = Arc::new(TaskSupervisor::new());
    let invoker = Arc::new(ToolInvoker::new(
        registry,
        supervisor.clone(),
        Duration::from_secs(30),
        10_000,
    ));
    (ConversationEngine::new(invoker, settings), supervisor)
}

pub struct TestDispatcher {
    pub dispatcher: Arc<Dispatcher>,
    pub storage: Arc<MemoryStorage>,
    pub sink: Arc<RecordingSink>,
    pub supervisor: Arc<TaskSupervisor>,
    _tmp: TempDir,
}

/// A dispatcher whose default chat provider is `provider`.
pub fn dispatcher_with(provider: Arc<dyn LLMProvider>) -> TestDispatcher {
    let tmp = TempDir::new().expect("create temp dir");
    let mut config = Config::default();
    config.agent.provider = "mock".to_string();
    config.agent.retries = 1;
    config.agent.compaction.enabled = false;
    config.agent.workspace = tmp.path().display().to_string();

    let providers = Arc::new(ProviderRegistry::new(&config));
    providers.install("mock", provider);

    let (engine, supervisor) = engine_with(Vec::new(), EngineSettings::from_config(&config.agent));
    let storage = Arc::new(MemoryStorage::new());
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Arc::new(Dispatcher::new(
        storage.clone(),
        providers,
        Arc::new(engine),
        sink.clone(),
        DispatcherSettings::from_config(&config.agent),
    ));
    TestDispatcher {
        dispatcher,
        storage,
        sink,
        supervisor,
        _tmp: tmp,
    }
}
