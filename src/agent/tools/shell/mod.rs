use crate::agent::tools::base::{ContextField, ExecutionContext, Tool, ToolResult};
use crate::utils::regex::RegexPatterns;
use crate::utils::subprocess::scrubbed_command;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum combined stdout+stderr size before truncation.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Runs a shell command in the user's working directory.
pub struct ExecTool {
    timeout: Duration,
    fallback_dir: PathBuf,
}

impl ExecTool {
    /// `fallback_dir` is used when the conversation carries no working directory.
    pub fn new(timeout: Duration, fallback_dir: PathBuf) -> Self {
        Self {
            timeout,
            fallback_dir,
        }
    }

    fn render(stdout: &[u8], stderr: &[u8]) -> String {
        let truncated = stdout.len() + stderr.len() > MAX_OUTPUT_BYTES;

        // Reserve at least 25% for stderr so error messages aren't lost.
        let stderr_reserve = MAX_OUTPUT_BYTES / 4;
        let stdout_max = MAX_OUTPUT_BYTES - stderr_reserve.min(stderr.len());
        let stdout = truncate_at_utf8_boundary(stdout, stdout_max);
        let remaining = MAX_OUTPUT_BYTES.saturating_sub(stdout.len());
        let stderr = truncate_at_utf8_boundary(stderr, remaining);

        let stdout = String::from_utf8_lossy(stdout);
        let stderr = String::from_utf8_lossy(stderr);

        let mut result = RegexPatterns::ansi_escape()
            .replace_all(&stdout, "")
            .into_owned();
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n--- stderr ---\n");
            }
            result.push_str(&RegexPatterns::ansi_escape().replace_all(&stderr, ""));
        }
        if truncated {
            result.push_str("\n[output truncated]");
        }
        result
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command in the user's working directory and return its output."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn context_fields(&self) -> &[ContextField] {
        &[ContextField::WorkingDir]
    }

    fn execution_timeout(&self) -> Option<Duration> {
        // Room for the process kill to land after our own timeout fires.
        Some(self.timeout + Duration::from_secs(5))
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let command = params["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' parameter"))?;

        let cwd = ctx
            .working_dir
            .clone()
            .unwrap_or_else(|| self.fallback_dir.clone());
        tokio::fs::create_dir_all(&cwd)
            .await
            .with_context(|| format!("Failed to create working directory {}", cwd.display()))?;

        let mut cmd = scrubbed_command("sh", &HashMap::new());
        cmd.arg("-c").arg(command).current_dir(&cwd);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let result = Self::render(&output.stdout, &output.stderr);
                if output.status.success() {
                    Ok(ToolResult::new(if result.is_empty() {
                        "(no output)".to_string()
                    } else {
                        result
                    }))
                } else {
                    let code = output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string());
                    Ok(ToolResult::error(format!(
                        "command failed (exit {}): {}",
                        code, result
                    )))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::error(format!("error executing command: {}", e))),
            Err(_) => Ok(ToolResult::error(format!(
                "command timed out after {} seconds",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Truncate a byte slice at a UTF-8 character boundary, never splitting
/// a multi-byte character.
fn truncate_at_utf8_boundary(data: &[u8], max: usize) -> &[u8] {
    if max >= data.len() {
        return data;
    }
    let mut end = max;
    while end > 0 && (data[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    &data[..end]
}
