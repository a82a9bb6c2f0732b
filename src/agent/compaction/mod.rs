use crate::config::CompactionConfig;
use crate::providers::base::{ChatRequest, LLMProvider, Message, Role};
use crate::storage::{Storage, User};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPACTION_PROMPT: &str = "Summarize this conversation history concisely while preserving:\n1. Key decisions made and their reasoning\n2. Important facts, names, dates, and numbers mentioned\n3. User preferences and requests\n4. Pending tasks or commitments\n\nPrevious summary (if any):\n{previous_summary}\n\nMessages to summarize:\n{messages}\n\nWrite a concise summary (max 400 words). Do not include preamble - just the summary.";

const COMPACTION_MAX_TOKENS: u32 = 1500;
const COMPACTION_TEMPERATURE: f32 = 0.3;
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    // Use char count for better accuracy with non-ASCII text
    text.chars().count() / CHARS_PER_TOKEN_ESTIMATE
}

/// Content plus tool-call names and arguments.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            let calls: usize = m
                .tool_calls
                .iter()
                .flatten()
                .map(|c| estimate_tokens(&c.function.name) + estimate_tokens(&c.function.arguments))
                .sum();
            estimate_tokens(&m.content) + calls
        })
        .sum()
}

/// Index where the kept tail begins: at most `keep_recent` turns, moved
/// earlier so the tail never opens with a tool turn cut off from its call.
pub fn split_point(messages: &[Message], keep_recent: usize) -> usize {
    let mut split = messages.len().saturating_sub(keep_recent);
    while split > 0 && split < messages.len() && messages[split].role == Role::Tool {
        split -= 1;
    }
    split
}

/// Drop tool turns whose call is missing and count calls without a result.
///
/// Returns `(removed_results, orphaned_calls)`.
pub fn strip_orphaned_tool_messages(messages: &mut Vec<Message>) -> (usize, usize) {
    let call_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| c.id.clone())
        .collect();
    let result_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    let before = messages.len();
    messages.retain(|m| {
        m.role != Role::Tool
            || m
                .tool_call_id
                .as_ref()
                .is_some_and(|id| call_ids.contains(id))
    });
    let removed = before - messages.len();
    let orphaned_calls = call_ids.difference(&result_ids).count();

    if removed > 0 || orphaned_calls > 0 {
        debug!(
            "stripped {} orphaned tool result(s) and found {} orphaned tool call(s)",
            removed, orphaned_calls
        );
    }
    (removed, orphaned_calls)
}

pub struct MessageCompactor {
    provider: Arc<dyn LLMProvider>,
    model: Option<String>,
}

impl MessageCompactor {
    pub fn new(provider: Arc<dyn LLMProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    /// Summarize `messages`, folding in `previous_summary` so summaries build
    /// incrementally.
    pub async fn compact(&self, messages: &[Message], previous_summary: &str) -> Result<String> {
        debug!("compaction: summarizing {} messages", messages.len());
        let formatted: Vec<String> = messages
            .iter()
            .map(|m| match &m.tool_calls {
                Some(calls) if !calls.is_empty() => {
                    let names: Vec<&str> = calls.iter().map(|c| c.name()).collect();
                    format!("{}: [called {}] {}", m.role.as_str(), names.join(", "), m.content)
                }
                _ => format!("{}: {}", m.role.as_str(), m.content),
            })
            .collect();

        let effective_summary = if previous_summary.is_empty() {
            "(none)"
        } else {
            previous_summary
        };
        let prompt = COMPACTION_PROMPT
            .replace("{previous_summary}", effective_summary)
            .replace("{messages}", &formatted.join("\n"));

        let response = self
            .provider
            .chat(ChatRequest {
                messages: vec![Message::user(prompt)],
                tools: None,
                model: self.model.as_deref(),
                max_tokens: COMPACTION_MAX_TOKENS,
                temperature: COMPACTION_TEMPERATURE,
                tool_choice: None,
            })
            .await?;

        let summary = response.content.unwrap_or_default();
        if summary.trim().is_empty() {
            if !previous_summary.is_empty() {
                warn!("compaction returned empty summary, reusing previous summary");
                return Ok(previous_summary.to_string());
            }
            anyhow::bail!("compaction produced empty summary");
        }
        debug!("compaction complete: summary_len={}", summary.len());
        Ok(summary)
    }
}

/// Summarize a user's older history once it outgrows the configured budget.
///
/// The summarized turns are removed and the summary is stored on the user;
/// the recent tail keeps its ids. Returns whether anything was compacted.
pub async fn compact_history(
    storage: &dyn Storage,
    user: &mut User,
    compactor: &MessageCompactor,
    config: &CompactionConfig,
) -> Result<bool> {
    if !config.enabled {
        return Ok(false);
    }
    let messages = storage.get_messages(user).await?;
    let tokens = estimate_messages_tokens(&messages);
    if tokens <= config.threshold_tokens as usize {
        return Ok(false);
    }
    let split = split_point(&messages, config.keep_recent);
    if split == 0 {
        return Ok(false);
    }

    let previous = user.summary.clone().unwrap_or_default();
    let summary = compactor.compact(&messages[..split], &previous).await?;

    let mut recent = messages[split..].to_vec();
    strip_orphaned_tool_messages(&mut recent);
    user.messages = recent;
    user.summary = Some(summary);
    user.updated_at = chrono::Utc::now();
    storage.save_user(user).await?;
    info!(
        "compacted {} messages (~{} tokens) for user {}",
        split, tokens, user.id
    );
    Ok(true)
}
