pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::config::{StorageBackend, StorageConfig};
use crate::providers::base::Message;
use crate::utils::{expand_home, get_parley_home};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Chat,
    Image,
    Tts,
    Stt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Conversation owner. Mutated read-modify-write while the user's lock is held.
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub selections: BTreeMap<Modality, Selection>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_message_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Free-text memory the model maintains through the `remember` tool.
    #[serde(default)]
    pub info: String,
    /// Per-provider API tokens supplied by the user; these win over configured keys.
    #[serde(default)]
    pub api_tokens: HashMap<String, String>,
    /// Running summary of compacted history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("selections", &self.selections)
            .field("messages", &self.messages.len())
            .field("next_message_id", &self.next_message_id)
            .field("working_dir", &self.working_dir)
            .field("api_tokens", &self.api_tokens.keys().collect::<Vec<_>>())
            .field("summary", &self.summary.is_some())
            .finish_non_exhaustive()
    }
}

impl User {
    pub fn new(id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            selections: BTreeMap::new(),
            messages: Vec::new(),
            next_message_id: 0,
            working_dir: None,
            info: String::new(),
            api_tokens: HashMap::new(),
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn selection(&self, modality: Modality) -> Option<&Selection> {
        self.selections.get(&modality)
    }

    pub fn select(&mut self, modality: Modality, provider: impl Into<String>, model: Option<String>) {
        self.selections.insert(
            modality,
            Selection {
                provider: provider.into(),
                model,
            },
        );
    }

    /// Assigns the next id and expiry, appends, and drops anything already expired.
    pub fn push_message(&mut self, mut message: Message, ttl: Option<Duration>, now: DateTime<Utc>) -> Message {
        message.id = Some(self.next_message_id);
        self.next_message_id += 1;
        if let Some(ttl) = ttl
            && let Ok(ttl) = chrono::Duration::from_std(ttl)
        {
            message.expire_at = Some(now + ttl);
        }
        self.messages.retain(|m| !m.is_expired(now));
        self.messages.push(message.clone());
        self.updated_at = now;
        message
    }

    /// Stored turns in id order with expired ones removed.
    pub fn live_messages(&self, now: DateTime<Utc>) -> Vec<Message> {
        let mut live: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect();
        live.sort_by_key(|m| m.id);
        live
    }
}

/// Persistence contract for user aggregates.
///
/// Backends only load and store whole users; the message operations are
/// read-modify-write on the aggregate and persist through `save_user`.
/// Callers hold the user's lock, so backends need no locking of their own.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_or_create_user(&self, id: i64) -> Result<User>;

    async fn save_user(&self, user: &User) -> Result<()>;

    async fn add_message(&self, user: &mut User, message: Message, ttl: Option<Duration>) -> Result<Message> {
        let stored = user.push_message(message, ttl, Utc::now());
        self.save_user(user).await?;
        Ok(stored)
    }

    async fn get_messages(&self, user: &User) -> Result<Vec<Message>> {
        Ok(user.live_messages(Utc::now()))
    }

    async fn drop_messages(&self, user: &mut User) -> Result<()> {
        user.messages.clear();
        user.summary = None;
        user.updated_at = Utc::now();
        self.save_user(user).await
    }
}

/// Build the configured backend.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageBackend::File => {
            let dir = match config.path.as_deref() {
                Some(path) => expand_home(path),
                None => get_parley_home()?.join("users"),
            };
            Ok(Arc::new(FileStorage::new(dir, config.cache_size)?))
        }
    }
}
