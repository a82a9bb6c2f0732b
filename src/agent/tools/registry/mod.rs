use crate::agent::tools::base::{ExecutionContext, Tool, ToolResult};
use crate::providers::base::ToolDefinition;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

const MAX_TOOL_NAME_LEN: usize = 256;

/// A definition paired with the executor that serves it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: Arc<dyn Tool>,
}

/// Catalog of callable tools.
///
/// Writers copy the map and swap the `Arc`, so a `definitions()` snapshot
/// already handed to a model call is never affected by later registration.
pub struct ToolRegistry {
    tools: RwLock<Arc<HashMap<String, RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    fn snapshot(&self) -> Arc<HashMap<String, RegisteredTool>> {
        match self.tools.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, RegisteredTool>)) {
        let mut guard = match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(Arc::make_mut(&mut guard));
    }

    /// Add or replace the entry for `definition.name`.
    pub fn register(&self, definition: ToolDefinition, executor: Arc<dyn Tool>) {
        let name = definition.name.clone();
        if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN || name.chars().any(char::is_control) {
            warn!(
                "tool registry: rejecting tool with invalid name (len={}, has_control_chars={})",
                name.len(),
                name.chars().any(char::is_control)
            );
            return;
        }
        self.update(|tools| {
            if tools.contains_key(&name) {
                debug!("tool registry: replacing '{}'", name);
            }
            tools.insert(
                name.clone(),
                RegisteredTool {
                    definition,
                    executor,
                },
            );
        });
    }

    /// Register a tool under its own definition.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.register(tool.definition(), tool);
    }

    /// Remove every named entry. Unknown names are ignored.
    pub fn deregister(&self, names: &HashSet<String>) {
        if names.is_empty() {
            return;
        }
        self.update(|tools| {
            for name in names {
                if tools.remove(name).is_some() {
                    debug!("tool registry: removed '{}'", name);
                }
            }
        });
    }

    /// Flip the `register` gate without dropping the entry.
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        let mut found = false;
        self.update(|tools| {
            if let Some(entry) = tools.get_mut(name) {
                entry.definition.register = active;
                found = true;
            }
        });
        found
    }

    /// Active definitions sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let snapshot = self.snapshot();
        let mut defs: Vec<ToolDefinition> = snapshot
            .values()
            .filter(|t| t.definition.register)
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.snapshot().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Sorted names of every entry, active or not.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// The active entry for `name`, or a stub that reports the name as unknown.
    pub fn resolve(&self, name: &str) -> RegisteredTool {
        if let Some(found) = self.get(name).filter(|t| t.definition.register) {
            return found;
        }
        let available: Vec<String> = self.definitions().into_iter().map(|d| d.name).collect();
        let stub = UnknownTool {
            requested: name.to_string(),
            available,
        };
        RegisteredTool {
            definition: stub.definition(),
            executor: Arc::new(stub),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stands in for a tool name the model made up.
struct UnknownTool {
    requested: String,
    available: Vec<String>,
}

#[async_trait]
impl Tool for UnknownTool {
    fn name(&self) -> &str {
        &self.requested
    }

    fn description(&self) -> &'static str {
        "Unknown tool"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        warn!("model requested unknown tool '{}'", self.requested);
        let available = if self.available.is_empty() {
            "none".to_string()
        } else {
            self.available.join(", ")
        };
        Ok(ToolResult::error(format!(
            "Unknown tool '{}'. Available tools: {}",
            self.requested, available
        )))
    }
}
