//! The tool-calling conversation loop.
//!
//! Each round asks the model for the next turn with the current tool
//! catalog. Tool calls are run through the invoker and their results
//! appended, then the model is asked again. A round with no tool calls
//! ends the exchange.
use crate::agent::tools::{CallContext, ToolInvoker};
use crate::config::AgentConfig;
use crate::errors::{ParleyError, ParleyResult};
use crate::providers::base::{ChatRequest, LLMProvider, LLMResponse, Message, ToolCall, Usage};
use crate::providers::errors::map_provider_error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for one engine, read from the `agent` config section.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total provider attempts per round when responses come back empty.
    pub retries: u32,
    pub backoff_factor: f64,
    pub max_tool_rounds: usize,
    pub show_thoughts: bool,
    pub request_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retries: config.retries,
            backoff_factor: config.backoff_factor,
            max_tool_rounds: config.max_tool_rounds,
            show_thoughts: config.show_thoughts,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: String,
    pub usage: Usage,
    /// Turns produced by this exchange, in order, after the given history.
    pub new_messages: Vec<Message>,
}

/// Range the delay before retry `attempt` (0-based) is drawn from:
/// `factor * 2^attempt` plus 10% to 50% jitter.
pub fn backoff_bounds(factor: f64, attempt: u32) -> (Duration, Duration) {
    let base = factor.max(0.0) * 2f64.powi(attempt.min(30) as i32);
    (
        Duration::from_secs_f64(base * 1.1),
        Duration::from_secs_f64(base * 1.5),
    )
}

fn backoff_delay(factor: f64, attempt: u32) -> Duration {
    let (low, high) = backoff_bounds(factor, attempt);
    low + (high - low).mul_f64(fastrand::f64())
}

pub struct ConversationEngine {
    invoker: Arc<ToolInvoker>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(invoker: Arc<ToolInvoker>, settings: EngineSettings) -> Self {
        Self { invoker, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the exchange that follows `history` (which ends with the user's turn).
    pub async fn get_chat_response(
        &self,
        provider: &dyn LLMProvider,
        model: Option<&str>,
        history: Vec<Message>,
        call: &CallContext,
    ) -> ParleyResult<ChatOutcome> {
        let initial_len = history.len();
        let mut messages = history;
        let mut usage = Usage::default();
        let mut rounds = 0;

        loop {
            let response = self
                .next_response(provider, model, &messages, &mut usage)
                .await?;

            if !response.has_tool_calls() {
                let answer = response.content.unwrap_or_default();
                messages.push(Message::assistant(answer.clone(), None));
                let new_messages = messages.split_off(initial_len);
                debug!(
                    "exchange finished after {} tool rounds, {} new turns",
                    rounds,
                    new_messages.len()
                );
                return Ok(ChatOutcome {
                    answer,
                    usage,
                    new_messages,
                });
            }

            if rounds >= self.settings.max_tool_rounds {
                warn!(
                    "model still calling tools after {} rounds, giving up",
                    rounds
                );
                return Err(ParleyError::ToolLoopExceeded { rounds });
            }
            rounds += 1;

            self.surface_thoughts(&response, call).await;
            let calls = response.tool_calls;
            let results = self.run_tool_calls(&calls, call).await;
            messages.push(Message::assistant(
                response.content.unwrap_or_default(),
                Some(calls),
            ));
            messages.extend(results);
        }
    }

    /// One provider round, retrying empty responses and transient provider
    /// failures with jittered backoff.
    async fn next_response(
        &self,
        provider: &dyn LLMProvider,
        model: Option<&str>,
        messages: &[Message],
        usage: &mut Usage,
    ) -> ParleyResult<LLMResponse> {
        let tools = self.invoker.registry().definitions();
        let attempts = self.settings.retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let request = ChatRequest {
                messages: messages.to_vec(),
                tools: (!tools.is_empty()).then(|| tools.clone()),
                model,
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
                tool_choice: None,
            };
            let failure = match provider.chat(request).await {
                Ok(response) => {
                    usage.add(response.usage);
                    if !response.is_empty() {
                        return Ok(response);
                    }
                    last_error = None;
                    "an empty response".to_string()
                }
                Err(e) => {
                    let err = map_provider_error(e, provider.name(), self.settings.request_timeout);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let failure = format!("a transient error ({})", err);
                    last_error = Some(err);
                    failure
                }
            };
            if attempt + 1 < attempts {
                let delay = backoff_delay(self.settings.backoff_factor, attempt);
                warn!(
                    "{} returned {} (attempt {}/{}), retrying in {:.1}s",
                    provider.name(),
                    failure,
                    attempt + 1,
                    attempts,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(err @ ParleyError::Timeout { .. }) = last_error {
            return Err(err);
        }
        let model = model.unwrap_or_else(|| provider.default_model()).to_string();
        info!(
            "{} ({}) gave no usable response in {} attempts",
            provider.name(),
            model,
            attempts
        );
        Err(ParleyError::ServiceResponse {
            provider: provider.name().to_string(),
            model,
        })
    }

    async fn surface_thoughts(&self, response: &LLMResponse, call: &CallContext) {
        if !self.settings.show_thoughts {
            return;
        }
        let thoughts = response
            .reasoning_content
            .as_deref()
            .or(response.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let (Some(text), Some(chat_id), Some(sink)) = (thoughts, call.chat_id, &call.outbound) {
            sink.thoughts(chat_id, text).await;
        }
    }

    /// Run one round's calls concurrently; tool turns come back in call order.
    async fn run_tool_calls(&self, calls: &[ToolCall], call: &CallContext) -> Vec<Message> {
        let invocations = calls.iter().map(|tool_call| {
            debug!("tool call {} -> {}", tool_call.id, tool_call.name());
            self.invoker
                .invoke(tool_call.name(), &tool_call.function.arguments, call)
        });
        let responses = futures_util::future::join_all(invocations).await;
        calls
            .iter()
            .zip(responses)
            .map(|(tool_call, response)| {
                Message::tool_result(tool_call.id.clone(), response.to_content())
            })
            .collect()
    }
}
