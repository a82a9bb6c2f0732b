pub mod bridge;
pub mod connector;
pub mod proxy;
pub mod tool;

pub use bridge::McpToolBridge;
pub use connector::{ProtocolSession, RmcpConnector, SessionConnector, ToolDescriptor, TransportSpec};
pub use proxy::McpProxyTool;
pub use tool::McpTool;

use crate::agent::tools::base::ToolResult;
use crate::config::McpTransport;
use crate::errors::{ParleyError, ParleyResult};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extra time the caller waits beyond the connect timeout before giving up.
pub const CONNECT_GRACE: Duration = Duration::from_secs(5);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    /// Tools from the session are registered.
    Active,
    Disconnecting,
}

/// A live session as seen by callers. Two handles are the same session
/// exactly when their ids match.
#[derive(Clone)]
pub struct SessionHandle {
    pub name: String,
    pub id: u64,
    pub transport: McpTransport,
    session: Arc<dyn ProtocolSession>,
}

impl SessionHandle {
    pub async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        self.session.list_tools().await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

struct SessionEntry {
    id: u64,
    transport: McpTransport,
    state: SessionState,
    session: Option<Arc<dyn ProtocolSession>>,
    task: JoinHandle<()>,
    cancel: Option<oneshot::Sender<()>>,
    tools: HashSet<String>,
}

impl SessionEntry {
    fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::Active) && !self.task.is_finished()
    }

    fn handle(&self, name: &str) -> Option<SessionHandle> {
        self.session.clone().map(|session| SessionHandle {
            name: name.to_string(),
            id: self.id,
            transport: self.transport,
            session,
        })
    }
}

type SessionMap = Arc<std::sync::Mutex<HashMap<String, SessionEntry>>>;

/// Called with the session name and its tool names after the server hangs up.
pub type PeerClosedHook = Arc<dyn Fn(&str, &HashSet<String>) + Send + Sync>;
type HookSlot = Arc<std::sync::RwLock<Option<PeerClosedHook>>>;

fn lock_map(map: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every external tool-server session. Each session lives in one
/// background task; connect and disconnect are serialized by one async lock,
/// and the session map itself is only touched under a short synchronous lock.
pub struct ExternalSessionManager {
    connector: Arc<dyn SessionConnector>,
    ops: Mutex<()>,
    sessions: SessionMap,
    next_id: AtomicU64,
    on_peer_closed: HookSlot,
}

impl ExternalSessionManager {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            ops: Mutex::new(()),
            sessions: Arc::new(std::sync::Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            on_peer_closed: Arc::new(std::sync::RwLock::new(None)),
        }
    }

    /// Install the callback that receives a session's tools when the server
    /// closes it. Replaces any earlier hook.
    pub fn on_peer_closed(&self, hook: PeerClosedHook) {
        *self
            .on_peer_closed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub async fn connect_stdio(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> ParleyResult<SessionHandle> {
        let spec = TransportSpec::Stdio {
            command: command.to_string(),
            args: args.to_vec(),
            env: env.clone(),
        };
        self.connect(name, spec, timeout).await
    }

    pub async fn connect_sse(&self, name: &str, url: &str, timeout: Duration) -> ParleyResult<SessionHandle> {
        let spec = TransportSpec::Sse {
            url: url.to_string(),
        };
        self.connect(name, spec, timeout).await
    }

    /// Open a session, or return the live one already registered under `name`.
    pub async fn connect(
        &self,
        name: &str,
        spec: TransportSpec,
        timeout: Duration,
    ) -> ParleyResult<SessionHandle> {
        let _ops = self.ops.lock().await;

        let stale = {
            let mut sessions = lock_map(&self.sessions);
            if let Some(entry) = sessions.get(name) {
                if entry.is_live()
                    && let Some(handle) = entry.handle(name)
                {
                    debug!("MCP session '{}' already connected", name);
                    return Ok(handle);
                }
                sessions.remove(name)
            } else {
                None
            }
        };
        if let Some(stale) = stale {
            debug!("dropping dead MCP session '{}'", name);
            stale.task.abort();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transport = spec.kind();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(SessionTask {
            name: name.to_string(),
            id,
            connector: self.connector.clone(),
            spec,
            open_timeout: timeout,
            ready_tx,
            cancel_rx,
            sessions: self.sessions.clone(),
            on_peer_closed: self.on_peer_closed.clone(),
        }));

        lock_map(&self.sessions).insert(
            name.to_string(),
            SessionEntry {
                id,
                transport,
                state: SessionState::Connecting,
                session: None,
                task,
                cancel: Some(cancel_tx),
                tools: HashSet::new(),
            },
        );

        let wait = timeout + CONNECT_GRACE;
        let failure = match tokio::time::timeout(wait, ready_rx).await {
            Ok(Ok(Ok(session))) => {
                let mut sessions = lock_map(&self.sessions);
                if let Some(entry) = sessions.get_mut(name) {
                    entry.state = SessionState::Ready;
                    entry.session = Some(session.clone());
                }
                info!("MCP session '{}' ready ({})", name, transport);
                return Ok(SessionHandle {
                    name: name.to_string(),
                    id,
                    transport,
                    session,
                });
            }
            Ok(Ok(Err(e))) => format!("{:#}", e),
            Ok(Err(_)) => "session task exited before signalling readiness".to_string(),
            Err(_) => format!("not ready after {:?}", wait),
        };

        let removed = lock_map(&self.sessions).remove(name);
        if let Some(entry) = removed {
            entry.task.abort();
        }
        warn!("MCP session '{}' failed to connect: {}", name, failure);
        Err(ParleyError::Connection {
            session: name.to_string(),
            message: failure,
        })
    }

    /// Stop the session and return the tool names that were associated with it.
    /// Unknown names yield an empty set. Cleanup problems are logged only.
    pub async fn disconnect(&self, name: &str) -> HashSet<String> {
        let _ops = self.ops.lock().await;

        let entry = {
            let mut sessions = lock_map(&self.sessions);
            if let Some(entry) = sessions.get_mut(name) {
                entry.state = SessionState::Disconnecting;
            }
            sessions.remove(name)
        };
        let Some(mut entry) = entry else {
            return HashSet::new();
        };

        if let Some(cancel) = entry.cancel.take() {
            let _ = cancel.send(());
        }
        match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut entry.task).await {
            Ok(Ok(())) => info!("MCP session '{}' disconnected", name),
            Ok(Err(e)) if e.is_cancelled() => debug!("MCP session '{}' task was cancelled", name),
            Ok(Err(e)) => warn!("MCP session '{}' task failed during cleanup: {}", name, e),
            Err(_) => {
                warn!(
                    "MCP session '{}' cleanup exceeded {:?}, aborting",
                    name, DISCONNECT_TIMEOUT
                );
                entry.task.abort();
            }
        }
        entry.tools
    }

    fn live_session(&self, name: &str) -> ParleyResult<Arc<dyn ProtocolSession>> {
        lock_map(&self.sessions)
            .get(name)
            .filter(|entry| entry.is_live())
            .and_then(|entry| entry.session.clone())
            .ok_or_else(|| ParleyError::NoActiveSession(name.to_string()))
    }

    /// Forward one tool call to `server`, bounded by `timeout`.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ParleyResult<ToolResult> {
        let session = self.live_session(server)?;
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        match tokio::time::timeout(timeout, session.call_tool(tool, arguments)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ParleyError::Connection {
                session: server.to_string(),
                message: format!("{:#}", e),
            }),
            Err(_) => Err(ParleyError::Timeout {
                operation: format!("{}/{}", server, tool),
                after: timeout,
            }),
        }
    }

    pub async fn list_tools(&self, server: &str) -> ParleyResult<Vec<ToolDescriptor>> {
        let session = self.live_session(server)?;
        match tokio::time::timeout(LIST_TOOLS_TIMEOUT, session.list_tools()).await {
            Ok(Ok(tools)) => Ok(tools),
            Ok(Err(e)) => Err(ParleyError::Connection {
                session: server.to_string(),
                message: format!("{:#}", e),
            }),
            Err(_) => Err(ParleyError::Timeout {
                operation: format!("{}/list_tools", server),
                after: LIST_TOOLS_TIMEOUT,
            }),
        }
    }

    /// Record the registry names that belong to `name`. Marks the session active.
    pub fn set_tools(&self, name: &str, tools: HashSet<String>) -> bool {
        let mut sessions = lock_map(&self.sessions);
        match sessions.get_mut(name) {
            Some(entry) => {
                if entry.state == SessionState::Ready && !tools.is_empty() {
                    entry.state = SessionState::Active;
                }
                entry.tools = tools;
                true
            }
            None => false,
        }
    }

    pub fn tools_of(&self, name: &str) -> HashSet<String> {
        lock_map(&self.sessions)
            .get(name)
            .map(|entry| entry.tools.clone())
            .unwrap_or_default()
    }

    pub fn state(&self, name: &str) -> Option<SessionState> {
        lock_map(&self.sessions).get(name).map(|entry| entry.state)
    }

    /// Sorted names of every registered session.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_map(&self.sessions).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock_map(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_map(&self.sessions).is_empty()
    }

    /// Disconnect every session, returning all associated tool names.
    pub async fn shutdown(&self) -> HashSet<String> {
        let mut tools = HashSet::new();
        for name in self.names() {
            tools.extend(self.disconnect(&name).await);
        }
        tools
    }
}

struct SessionTask {
    name: String,
    id: u64,
    connector: Arc<dyn SessionConnector>,
    spec: TransportSpec,
    open_timeout: Duration,
    ready_tx: oneshot::Sender<anyhow::Result<Arc<dyn ProtocolSession>>>,
    cancel_rx: oneshot::Receiver<()>,
    sessions: SessionMap,
    on_peer_closed: HookSlot,
}

/// Body of a session's owning task: open, signal readiness, hold until
/// cancelled or the peer goes away, then release.
async fn run_session(task: SessionTask) {
    let SessionTask {
        name,
        id,
        connector,
        spec,
        open_timeout,
        ready_tx,
        cancel_rx,
        sessions,
        on_peer_closed,
    } = task;

    let opened = match tokio::time::timeout(open_timeout, connector.open(&name, &spec)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("handshake timed out after {:?}", open_timeout)),
    };
    let session = match opened {
        Ok(session) => session,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(session.clone())).is_err() {
        debug!("MCP session '{}' opened after the caller gave up", name);
        if let Err(e) = session.close().await {
            warn!("MCP session '{}' close failed: {:#}", name, e);
        }
        return;
    }

    let peer_closed = tokio::select! {
        _ = cancel_rx => false,
        () = session.closed() => true,
    };

    if let Err(e) = session.close().await {
        warn!("MCP session '{}' close failed: {:#}", name, e);
    }

    if !peer_closed {
        return;
    }
    warn!("MCP session '{}' closed by the server", name);
    let removed = {
        let mut map = lock_map(&sessions);
        if map.get(&name).is_some_and(|entry| entry.id == id) {
            map.remove(&name)
        } else {
            None
        }
    };
    let Some(entry) = removed else {
        return;
    };
    let hook = on_peer_closed
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(hook) = hook {
        hook(&name, &entry.tools);
    } else if !entry.tools.is_empty() {
        warn!(
            "MCP session '{}' left {} tools with nobody to remove them",
            name,
            entry.tools.len()
        );
    }
}

#[cfg(test)]
mod tests;
