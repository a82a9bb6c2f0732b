use std::time::Duration;
use thiserror::Error;

/// Typed error hierarchy for parley.
///
/// Use at module boundaries (provider calls, external sessions, config validation,
/// the conversation engine). Leaf functions keep using `anyhow::Result`; the
/// `Internal` variant converts via `?`.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The provider kept returning empty completions until retries ran out.
    #[error("Service response error from {provider} ({model})")]
    ServiceResponse { provider: String, model: String },

    #[error("Tool loop exceeded {rounds} rounds")]
    ToolLoopExceeded { rounds: usize },

    #[error("Connection to '{session}' failed: {message}")]
    Connection { session: String, message: String },

    #[error("No active session '{0}'")]
    NoActiveSession(String),

    #[error("'{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ParleyResult<T> = Result<T, ParleyError>;

impl ParleyError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::RateLimit { .. }
            | Self::Internal(_)
            | Self::Auth(_)
            | Self::Config(_)
            | Self::ServiceResponse { .. }
            | Self::ToolLoopExceeded { .. }
            | Self::Connection { .. }
            | Self::NoActiveSession(_) => false,
        }
    }

    /// Text shown to the chat user when this error reaches the message boundary.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("⚙️ {}", msg),
            Self::Auth(provider) => format!(
                "🔑 The provider rejected the credentials ({}). Check your API key.",
                provider
            ),
            Self::RateLimit {
                retry_after: Some(secs),
            } => format!(
                "⏳ The provider is rate limiting requests. Please back off for {}s and try again.",
                secs
            ),
            Self::RateLimit { retry_after: None } => {
                "⏳ The provider is rate limiting requests. Please back off and try again later."
                    .to_string()
            }
            Self::ServiceResponse { provider, model } => format!(
                "😕 {} ({}) did not return a usable response. Please try again.",
                provider, model
            ),
            Self::ToolLoopExceeded { rounds } => format!(
                "🔁 Stopped after {} rounds of tool calls without a final answer.",
                rounds
            ),
            Self::Timeout { after, .. } => format!(
                "⌛ No answer within {}. Please try again.",
                humantime::format_duration(*after)
            ),
            Self::Provider { .. }
            | Self::Connection { .. }
            | Self::NoActiveSession(_)
            | Self::Internal(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

pub const GENERIC_FAILURE: &str = "Something went wrong, please try again.";

/// Recover a typed error from an `anyhow` chain, wrapping anything else as `Internal`.
pub fn classify(err: anyhow::Error) -> ParleyError {
    match err.downcast::<ParleyError>() {
        Ok(typed) => typed,
        Err(other) => ParleyError::Internal(other),
    }
}
