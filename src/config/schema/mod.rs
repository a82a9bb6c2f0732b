use crate::errors::ParleyError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            — printed normally via `&self.field_name`
/// - `redact(field_name)`    — `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules — declared after the macro so they can use `redact_debug!`
mod agent;
mod channels;
mod mcp;
mod providers;

pub use agent::*;
pub use channels::*;
pub use mcp::*;
pub use providers::*;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

fn default_user_cache_size() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the file backend. Defaults to `$PARLEY_HOME/users`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_user_cache_size", rename = "cacheSize")]
    pub cache_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: None,
            cache_size: default_user_cache_size(),
        }
    }
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_shutdown_grace_secs", rename = "shutdownGraceSecs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ParleyError> {
        self.validate_agent()?;
        self.validate_compaction()?;
        self.validate_providers()?;
        self.validate_mcp()?;
        if self.storage.cache_size == 0 {
            return Err(ParleyError::Config("storage.cacheSize must be > 0".into()));
        }
        Ok(())
    }

    fn validate_agent(&self) -> Result<(), ParleyError> {
        let a = &self.agent;

        if a.max_tokens == 0 {
            return Err(ParleyError::Config("agent.maxTokens must be > 0".into()));
        }
        if a.max_tokens > 1_000_000 {
            return Err(ParleyError::Config(
                "agent.maxTokens is unreasonably large (> 1,000,000)".into(),
            ));
        }
        if !a.temperature.is_finite() || a.temperature < 0.0 || a.temperature > 2.0 {
            return Err(ParleyError::Config(
                "agent.temperature must be a finite number between 0.0 and 2.0".into(),
            ));
        }
        if a.retries == 0 {
            return Err(ParleyError::Config("agent.retries must be >= 1".into()));
        }
        if !a.backoff_factor.is_finite() || a.backoff_factor < 0.0 {
            return Err(ParleyError::Config(
                "agent.backoffFactor must be a non-negative finite number".into(),
            ));
        }
        if a.max_tool_rounds == 0 {
            return Err(ParleyError::Config("agent.maxToolRounds must be > 0".into()));
        }
        if a.max_tool_rounds > 1000 {
            return Err(ParleyError::Config(
                "agent.maxToolRounds is unreasonably large (> 1000)".into(),
            ));
        }
        if a.tool_timeout_secs == 0 || a.request_timeout_secs == 0 {
            return Err(ParleyError::Config(
                "agent.toolTimeoutSecs and agent.requestTimeoutSecs must be > 0".into(),
            ));
        }
        if a.message_ttl_secs == Some(0) {
            return Err(ParleyError::Config(
                "agent.messageTtlSecs must be > 0 (omit it to keep messages forever)".into(),
            ));
        }
        if a.retries > 10 {
            warn!("agent.retries is high ({}), empty responses will stall users", a.retries);
        }
        Ok(())
    }

    fn validate_compaction(&self) -> Result<(), ParleyError> {
        let c = &self.agent.compaction;
        if c.enabled {
            if c.threshold_tokens == 0 {
                return Err(ParleyError::Config(
                    "agent.compaction.thresholdTokens must be > 0 when enabled".into(),
                ));
            }
            if c.keep_recent == 0 {
                return Err(ParleyError::Config(
                    "agent.compaction.keepRecent must be > 0 when enabled".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ParleyError> {
        let known = self.providers.names();
        if !known.iter().any(|n| n == &self.agent.provider) {
            return Err(ParleyError::Config(format!(
                "agent.provider '{}' is not a configured provider (known: {})",
                self.agent.provider,
                known.join(", ")
            )));
        }
        for (name, compatible) in &self.providers.compatible {
            if compatible.api_base.as_deref().is_none_or(str::is_empty) {
                return Err(ParleyError::Config(format!(
                    "providers.compatible.{name}.apiBase is required"
                )));
            }
        }
        Ok(())
    }

    fn validate_mcp(&self) -> Result<(), ParleyError> {
        if self.mcp.connect_timeout_secs == 0 || self.mcp.call_timeout_secs == 0 {
            return Err(ParleyError::Config(
                "mcp.connectTimeoutSecs and mcp.callTimeoutSecs must be > 0".into(),
            ));
        }
        for (name, server) in &self.mcp.servers {
            if !crate::utils::regex::RegexPatterns::identifier().is_match(name) {
                return Err(ParleyError::Config(format!(
                    "mcp.servers key '{name}' must match [A-Za-z0-9_-]{{1,64}}"
                )));
            }
            match server.transport {
                McpTransport::Stdio if server.command.trim().is_empty() => {
                    return Err(ParleyError::Config(format!(
                        "mcp.servers.{name}.command is required for stdio transport"
                    )));
                }
                McpTransport::Sse if server.url.as_deref().is_none_or(str::is_empty) => {
                    return Err(ParleyError::Config(format!(
                        "mcp.servers.{name}.url is required for sse transport"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
