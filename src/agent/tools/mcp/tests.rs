use super::*;
use crate::agent::tools::base::{ExecutionContext, Tool};
use crate::agent::tools::registry::ToolRegistry;
use crate::config::McpConfig;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use tokio::sync::watch;

#[derive(Clone, Copy)]
enum Behaviour {
    Works,
    Fails,
    Hangs,
    ListFails,
}

struct FakeSession {
    closed_tx: watch::Sender<bool>,
    close_calls: AtomicUsize,
    list_fails: bool,
}

impl FakeSession {
    fn new(list_fails: bool) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            closed_tx,
            close_calls: AtomicUsize::new(0),
            list_fails,
        }
    }

    fn hang_up(&self) {
        let _ = self.closed_tx.send(true);
    }
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        if self.list_fails {
            anyhow::bail!("tools/list not supported");
        }
        Ok(vec![
            ToolDescriptor {
                name: "echo".into(),
                description: "Echo arguments".into(),
                input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            },
            ToolDescriptor {
                name: "slow".into(),
                description: "Never answers".into(),
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> anyhow::Result<ToolResult> {
        match tool {
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolResult::new("late"))
            }
            _ => Ok(ToolResult::new(Value::Object(arguments).to_string())),
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeConnector {
    behaviour: Behaviour,
    opens: AtomicUsize,
    last: std::sync::Mutex<Option<Arc<FakeSession>>>,
}

impl FakeConnector {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            opens: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
        })
    }

    fn last_session(&self) -> Arc<FakeSession> {
        self.last.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(&self, _name: &str, _spec: &TransportSpec) -> anyhow::Result<Arc<dyn ProtocolSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Fails => anyhow::bail!("server exited with status 1"),
            Behaviour::Hangs => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behaviour::Works | Behaviour::ListFails => {
                let session = Arc::new(FakeSession::new(matches!(
                    self.behaviour,
                    Behaviour::ListFails
                )));
                *self.last.lock().unwrap() = Some(session.clone());
                Ok(session)
            }
        }
    }
}

fn stdio() -> TransportSpec {
    TransportSpec::Stdio {
        command: "fake-server".into(),
        args: vec![],
        env: HashMap::new(),
    }
}

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_connect_is_idempotent() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = ExternalSessionManager::new(connector.clone());

    let first = manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    let second = manager.connect("demo", stdio(), TIMEOUT).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state("demo"), Some(SessionState::Ready));
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_session() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = Arc::new(ExternalSessionManager::new(connector.clone()));

    let a = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("demo", stdio(), TIMEOUT).await })
    };
    let b = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("demo", stdio(), TIMEOUT).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_connect_leaves_no_entry() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Fails));
    let err = manager.connect("broken", stdio(), TIMEOUT).await.unwrap_err();
    match err {
        ParleyError::Connection { session, message } => {
            assert_eq!(session, "broken");
            assert!(message.contains("exited"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(manager.state("broken").is_none());
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_handshake_bounded_by_timeout_plus_grace() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Hangs));
    let started = tokio::time::Instant::now();
    let err = manager.connect("stuck", stdio(), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ParleyError::Connection { .. }));
    assert!(started.elapsed() <= TIMEOUT + CONNECT_GRACE);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_disconnect_returns_tools_and_closes() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = ExternalSessionManager::new(connector.clone());
    manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    let tools: HashSet<String> = ["demo__echo".to_string()].into();
    assert!(manager.set_tools("demo", tools.clone()));
    assert_eq!(manager.state("demo"), Some(SessionState::Active));
    assert_eq!(manager.tools_of("demo"), tools);

    let removed = manager.disconnect("demo").await;
    assert_eq!(removed, tools);
    assert!(manager.state("demo").is_none());
    assert_eq!(connector.last_session().close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disconnect_unknown_is_empty() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Works));
    assert!(manager.disconnect("nobody").await.is_empty());
    assert!(!manager.set_tools("nobody", HashSet::new()));
}

#[tokio::test]
async fn test_reconnect_after_disconnect_opens_new_session() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = ExternalSessionManager::new(connector.clone());
    let first = manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    manager.disconnect("demo").await;
    let second = manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_call_tool_without_session() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Works));
    let err = manager
        .call_tool("ghost", "echo", json!({}), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::NoActiveSession(ref name) if name == "ghost"));
}

#[tokio::test]
async fn test_call_tool_forwards_arguments() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Works));
    manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    let result = manager
        .call_tool("demo", "echo", json!({"text": "hi"}), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(result.content, r#"{"text":"hi"}"#);
}

#[tokio::test(start_paused = true)]
async fn test_call_tool_times_out() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Works));
    manager.connect("demo", stdio(), TIMEOUT).await.unwrap();
    let err = manager
        .call_tool("demo", "slow", json!({}), Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::Timeout { ref operation, .. } if operation == "demo/slow"));
}

#[tokio::test]
async fn test_peer_close_removes_session_and_fails_calls() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = ExternalSessionManager::new(connector.clone());
    manager.connect("demo", stdio(), TIMEOUT).await.unwrap();

    connector.last_session().hang_up();
    for _ in 0..100 {
        if manager.state("demo").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(manager.state("demo").is_none());
    let err = manager
        .call_tool("demo", "echo", json!({}), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::NoActiveSession(_)));
    assert_eq!(connector.last_session().close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_disconnects_everything() {
    let manager = ExternalSessionManager::new(FakeConnector::new(Behaviour::Works));
    manager.connect("a", stdio(), TIMEOUT).await.unwrap();
    manager.connect("b", stdio(), TIMEOUT).await.unwrap();
    manager.set_tools("a", ["a__echo".to_string()].into());
    let tools = manager.shutdown().await;
    assert!(tools.contains("a__echo"));
    assert!(manager.is_empty());
}

fn bridge_with(behaviour: Behaviour) -> (Arc<McpToolBridge>, Arc<ToolRegistry>) {
    let manager = Arc::new(ExternalSessionManager::new(FakeConnector::new(behaviour)));
    let registry = Arc::new(ToolRegistry::new());
    let bridge = Arc::new(McpToolBridge::new(
        manager,
        registry.clone(),
        &McpConfig::default(),
    ));
    (bridge, registry)
}

#[tokio::test]
async fn test_bridge_attach_and_detach() {
    let (bridge, registry) = bridge_with(Behaviour::Works);
    let tools = bridge.attach("files", stdio()).await.unwrap();
    assert_eq!(tools, vec!["files__echo", "files__slow"]);
    assert!(registry.contains("files__echo"));
    assert_eq!(
        bridge.manager().state("files"),
        Some(SessionState::Active)
    );

    // Second attach is a no-op returning the same names
    assert_eq!(bridge.attach("files", stdio()).await.unwrap(), tools);

    let removed = bridge.detach("files").await;
    assert_eq!(removed, tools);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_bridge_tears_down_when_listing_fails() {
    let (bridge, registry) = bridge_with(Behaviour::ListFails);
    assert!(bridge.attach("odd", stdio()).await.is_err());
    assert!(bridge.manager().state("odd").is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_proxy_forwards_through_manager() {
    let (bridge, registry) = bridge_with(Behaviour::Works);
    bridge.attach("files", stdio()).await.unwrap();
    let proxy = registry.get("files__echo").unwrap().executor;
    let result = proxy
        .execute(json!({"text": "via proxy"}), &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(result.content, r#"{"text":"via proxy"}"#);

    bridge.detach("files").await;
    assert!(
        proxy
            .execute(json!({}), &ExecutionContext::default())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_mcp_tool_actions() {
    let (bridge, registry) = bridge_with(Behaviour::Works);
    let tool = McpTool::new(bridge);

    let connected = tool
        .execute(
            json!({"action": "connect_stdio", "name": "files", "command": "fake-server"}),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert!(!connected.is_error);
    assert!(registry.contains("files__echo"));

    let listed = tool
        .execute(json!({"action": "list"}), &ExecutionContext::default())
        .await
        .unwrap();
    let listed: Value = serde_json::from_str(&listed.content).unwrap();
    assert_eq!(listed["servers"][0]["name"], "files");
    assert_eq!(listed["servers"][0]["state"], "active");

    let bad_name = tool
        .execute(
            json!({"action": "disconnect", "name": "../etc"}),
            &ExecutionContext::default(),
        )
        .await;
    assert!(bad_name.is_err());

    let disconnected = tool
        .execute(
            json!({"action": "disconnect", "name": "files"}),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert!(disconnected.content.contains("files__echo"));
    assert!(registry.is_empty());
}

#[test]
fn test_exposed_name_sanitized() {
    assert_eq!(proxy::exposed_name("fs", "read.file"), "fs__read_file");
    assert_eq!(proxy::exposed_name("a", &"x".repeat(100)).len(), 64);
}

#[test]
fn test_spec_from_config() {
    let mut server = crate::config::McpServerConfig {
        transport: McpTransport::Sse,
        command: String::new(),
        args: vec![],
        env: HashMap::new(),
        url: None,
        enabled: true,
    };
    assert!(bridge::spec_from_config("s", &server).is_err());
    server.url = Some("https://mcp.example.com/mcp".into());
    assert_eq!(
        bridge::spec_from_config("s", &server).unwrap(),
        TransportSpec::Sse {
            url: "https://mcp.example.com/mcp".into()
        }
    );
}

#[tokio::test]
async fn test_server_hangup_removes_proxy_tools() {
    let connector = FakeConnector::new(Behaviour::Works);
    let manager = Arc::new(ExternalSessionManager::new(connector.clone()));
    let registry = Arc::new(ToolRegistry::new());
    let bridge = McpToolBridge::new(manager.clone(), registry.clone(), &McpConfig::default());
    bridge.attach("files", stdio()).await.unwrap();
    assert_eq!(registry.tool_names(), vec!["files__echo", "files__slow"]);

    connector.last_session().hang_up();
    for _ in 0..100 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registry.is_empty());
    assert!(manager.state("files").is_none());
    assert!(bridge.detach("files").await.is_empty());

    // Reattaching after the hangup opens a fresh session with fresh tools
    let tools = bridge.attach("files", stdio()).await.unwrap();
    assert_eq!(tools, vec!["files__echo", "files__slow"]);
    assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
}
