use crate::agent::tools::base::{CallContext, ExecutionContext, Tool, ToolResponse, ToolResult};
use crate::agent::tools::registry::ToolRegistry;
use crate::utils::task_supervisor::TaskSupervisor;
use crate::utils::truncation::truncate_tool_result;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Argument key that asks for background execution. Consumed by the invoker.
pub const RUN_IN_BACKGROUND_ARG: &str = "run_in_background";

/// Uniform wrapper around every tool call. Never fails: parse errors,
/// validation errors, executor errors, timeouts and panics all come back as
/// an error `ToolResponse`.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    supervisor: Arc<TaskSupervisor>,
    default_timeout: Duration,
    max_result_chars: usize,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        supervisor: Arc<TaskSupervisor>,
        default_timeout: Duration,
        max_result_chars: usize,
    ) -> Self {
        Self {
            registry,
            supervisor,
            default_timeout,
            max_result_chars,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn invoke(&self, name: &str, arguments: &str, call: &CallContext) -> ToolResponse {
        let resolved = self.registry.resolve(name);

        let mut params = match parse_arguments(arguments) {
            Ok(params) => params,
            Err(message) => {
                warn!("tool '{}': {}", name, message);
                return ToolResponse::error(name, message);
            }
        };

        let background = params
            .remove(RUN_IN_BACKGROUND_ARG)
            .and_then(|v| v.as_bool())
            .unwrap_or(resolved.definition.run_in_background_by_default);

        let mut params = Value::Object(params);
        if let Some(message) = validate_tool_params(name, &resolved.definition.parameters, &params) {
            return ToolResponse::error(name, message);
        }

        let executor = resolved.executor;
        let fields = executor.context_fields();
        if let Value::Object(map) = &mut params {
            for field in fields {
                if let (Some(key), Some(value)) = (field.argument_key(), call.argument_value(*field)) {
                    map.insert(key.to_string(), value);
                }
            }
        }
        let ctx = call.scoped(fields);
        let timeout = executor.execution_timeout().unwrap_or(self.default_timeout);

        if background {
            return self.spawn_background(name, executor, params, ctx, timeout, call).await;
        }

        let result = execute_with_guards(name, executor, params, ctx, timeout).await;
        self.respond(name, result)
    }

    async fn spawn_background(
        &self,
        name: &str,
        executor: Arc<dyn Tool>,
        params: Value,
        ctx: ExecutionContext,
        timeout: Duration,
        call: &CallContext,
    ) -> ToolResponse {
        let tool_name = name.to_string();
        let outbound = call.outbound.clone();
        let chat_id = call.chat_id;
        let max_chars = self.max_result_chars;

        let task = async move {
            let result = execute_with_guards(&tool_name, executor, params, ctx, timeout).await;
            let content = truncate_tool_result(&result.content, max_chars);
            if let (Some(outbound), Some(chat_id)) = (outbound, chat_id) {
                let text = if result.is_error {
                    format!("Background task '{}' failed: {}", tool_name, content)
                } else {
                    format!("Background task '{}' finished:\n{}", tool_name, content)
                };
                outbound.answer(chat_id, &text).await;
            } else {
                debug!("background tool '{}' finished with nowhere to deliver", tool_name);
            }
            Ok(())
        };

        match self.supervisor.run(format!("tool:{}", name), task, None).await {
            Some(task_id) => {
                info!("tool '{}' started in background (task {})", name, task_id);
                ToolResponse::ok(name, Value::String("started in background".to_string()))
                    .with_details(json!({"task_id": task_id}))
            }
            None => ToolResponse::error(name, "Shutting down, background work is not accepted"),
        }
    }

    fn respond(&self, name: &str, result: ToolResult) -> ToolResponse {
        let content = truncate_tool_result(&result.content, self.max_result_chars);
        if result.is_error {
            return ToolResponse::error(name, content);
        }
        let value = serde_json::from_str::<Value>(&content).unwrap_or(Value::String(content));
        ToolResponse::ok(name, value)
    }
}

/// Empty or blank input counts as `{}`; anything but an object is rejected.
fn parse_arguments(arguments: &str) -> Result<Map<String, Value>, String> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!(
            "Arguments must be a JSON object, got {}",
            value_type_name(&other)
        )),
        Err(e) => Err(format!("Invalid JSON arguments: {}", e)),
    }
}

/// Check required fields and primitive types against the tool's JSON schema.
/// Returns `Some(error_message)` when invalid.
pub(crate) fn validate_tool_params(tool_name: &str, schema: &Value, params: &Value) -> Option<String> {
    let mut errors = Vec::new();

    if let Some(required) = schema["required"].as_array() {
        for field in required {
            if let Some(field_name) = field.as_str()
                && (params.get(field_name).is_none() || params[field_name].is_null())
            {
                errors.push(format!("missing required parameter '{}'", field_name));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (field_name, field_schema) in properties {
            if let Some(value) = params.get(field_name)
                && !value.is_null()
                && let Some(expected_type) = field_schema["type"].as_str()
            {
                let type_ok = match expected_type {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    errors.push(format!(
                        "parameter '{}' should be {} but got {}",
                        field_name,
                        expected_type,
                        value_type_name(value)
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Invalid arguments for tool '{}': {}",
            tool_name,
            errors.join("; ")
        ))
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

/// Run the executor in its own task so panics are caught and the timeout is enforced.
async fn execute_with_guards(
    name: &str,
    tool: Arc<dyn Tool>,
    params: Value,
    ctx: ExecutionContext,
    timeout: Duration,
) -> ToolResult {
    let tool_name = name.to_string();
    let started = Instant::now();
    debug!("executing tool: {} with arguments: {}", tool_name, params);

    let handle = tokio::task::spawn(async move {
        tokio::time::timeout(timeout, tool.execute(params, &ctx)).await
    });

    let result = match handle.await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(e))) => ToolResult::error(format!("{:#}", e)),
        Ok(Err(_)) => {
            warn!("tool '{}' timed out after {}s", tool_name, timeout.as_secs());
            ToolResult::error(format!(
                "Tool '{}' timed out after {}s",
                tool_name,
                timeout.as_secs()
            ))
        }
        Err(join_err) if join_err.is_panic() => {
            // into_panic() consumes the JoinError so the message is extracted in one step
            let panic_payload = join_err.into_panic();
            let panic_msg = panic_payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic_payload.downcast_ref::<&str>().copied())
                .unwrap_or("unknown cause");
            error!("tool '{}' panicked: {}", tool_name, panic_msg);
            ToolResult::error(format!("Tool '{}' crashed: {}", tool_name, panic_msg))
        }
        Err(_) => ToolResult::error(format!("Tool '{}' was cancelled", tool_name)),
    };

    if result.is_error {
        warn!("tool '{}' returned error: {}", tool_name, result.content);
    } else {
        info!(
            "tool '{}' completed in {:?} ({} chars)",
            tool_name,
            started.elapsed(),
            result.content.len()
        );
    }
    result
}

#[cfg(test)]
mod tests;
