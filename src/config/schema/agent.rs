use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "super::default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold_tokens", rename = "thresholdTokens")]
    pub threshold_tokens: u32,
    #[serde(default = "default_keep_recent", rename = "keepRecent")]
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_tokens: default_threshold_tokens(),
            keep_recent: default_keep_recent(),
        }
    }
}

fn default_threshold_tokens() -> u32 {
    40000
}

fn default_keep_recent() -> usize {
    10
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant chatting with a user on Telegram. \
     Use the available tools when they help answer the question. \
     Keep answers concise."
        .to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_tool_rounds() -> usize {
    25
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_tool_result_chars() -> usize {
    10000
}

fn default_workspace() -> String {
    "~/.parley/workspaces".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider used when a user has not picked one with `/model`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used when a user has not picked one. `None` uses the provider default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_system_prompt", rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens", rename = "maxTokens")]
    pub max_tokens: u32,
    /// Total attempts for a provider round that keeps coming back empty.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base delay in seconds for the empty-response backoff.
    #[serde(default = "default_backoff_factor", rename = "backoffFactor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_tool_rounds", rename = "maxToolRounds")]
    pub max_tool_rounds: usize,
    /// Forward model thinking text to the chat before running tools.
    #[serde(default, rename = "showThoughts")]
    pub show_thoughts: bool,
    #[serde(default, rename = "messageTtlSecs")]
    pub message_ttl_secs: Option<u64>,
    #[serde(default = "default_tool_timeout_secs", rename = "toolTimeoutSecs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs", rename = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tool_result_chars", rename = "maxToolResultChars")]
    pub max_tool_result_chars: usize,
    /// Root for per-user working directories.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retries: default_retries(),
            backoff_factor: default_backoff_factor(),
            max_tool_rounds: default_max_tool_rounds(),
            show_thoughts: false,
            message_ttl_secs: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tool_result_chars: default_max_tool_result_chars(),
            workspace: default_workspace(),
            compaction: CompactionConfig::default(),
        }
    }
}
