//! Per-message boundary between the bus and the conversation engine.
//!
//! Every inbound message is handled under its sender's lock: load the user,
//! run a command or a conversation exchange, persist the new turns, reply.
//! Errors stop here and become a user-facing message.
use crate::agent::compaction::{MessageCompactor, compact_history};
use crate::agent::engine::ConversationEngine;
use crate::agent::tools::CallContext;
use crate::agent::user_lock::UserLocks;
use crate::bus::{InboundMessage, OutboundSink};
use crate::config::{AgentConfig, CompactionConfig};
use crate::errors::{GENERIC_FAILURE, ParleyError, ParleyResult, classify};
use crate::providers::ProviderRegistry;
use crate::providers::base::Message;
use crate::storage::{Modality, Storage, User};
use crate::utils::expand_home;
use crate::utils::regex::RegexPatterns;
use crate::utils::task_supervisor::TaskSupervisor;
use crate::utils::truncation::truncate_chars;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

const HELP_TEXT: &str = "Commands:\n\
/help - show this message\n\
/reset - forget the conversation so far\n\
/model [provider] [model] - show or change the chat model\n\
/models - list models of the current provider\n\
/info - show what I remember about you\n\
/token <provider> [key] - use your own API key (omit the key to remove it)\n\
/image <prompt> - generate an image\n\
/say <text> - speak text aloud";

const NOTHING_HEARD: &str = "🎙️ I couldn't make out any words in that voice message.";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub system_prompt: String,
    pub message_ttl: Option<Duration>,
    pub compaction: CompactionConfig,
    /// Root of the per-user working directories.
    pub workspace: PathBuf,
}

impl DispatcherSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            message_ttl: config.message_ttl_secs.map(Duration::from_secs),
            compaction: config.compaction.clone(),
            workspace: expand_home(&config.workspace),
        }
    }
}

pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    providers: Arc<ProviderRegistry>,
    engine: Arc<ConversationEngine>,
    locks: UserLocks,
    sink: Arc<dyn OutboundSink>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        providers: Arc<ProviderRegistry>,
        engine: Arc<ConversationEngine>,
        sink: Arc<dyn OutboundSink>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            storage,
            providers,
            engine,
            locks: UserLocks::new(),
            sink,
            settings,
        }
    }

    /// Pull messages off the bus until it closes or shutdown begins.
    /// Each message runs as supervised background work.
    pub async fn run(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        supervisor: Arc<TaskSupervisor>,
    ) {
        info!("dispatcher started");
        while let Some(msg) = inbound_rx.recv().await {
            let this = self.clone();
            let name = format!("message:{}", msg.sender_id);
            let scheduled = supervisor
                .run(
                    name,
                    async move {
                        this.handle(msg).await;
                        Ok::<_, anyhow::Error>(())
                    },
                    None,
                )
                .await;
            if scheduled.is_none() {
                info!("dispatcher stopping, shutdown in progress");
                break;
            }
        }
        info!("dispatcher stopped");
    }

    /// Handle one message and reply. Never fails.
    pub async fn handle(&self, msg: InboundMessage) {
        let request_id = Uuid::new_v4().simple().to_string();
        let span = info_span!(
            "message",
            id = &request_id[..8],
            user = msg.sender_id,
            channel = %msg.channel
        );
        self.handle_inner(msg).instrument(span).await;
    }

    async fn handle_inner(&self, msg: InboundMessage) {
        let chat_id = msg.chat_id;
        let reply = match self.process(&msg).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                match &e {
                    ParleyError::Internal(inner) => {
                        error!("message from {} failed: {:#}", msg.sender_id, inner);
                    }
                    other => warn!("message from {} failed: {}", msg.sender_id, other),
                }
                e.user_message()
            }
        };
        let reply = if reply.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            reply
        };
        self.sink.answer(chat_id, &reply).await;
    }

    /// Reply text for `msg`, or `None` when nothing should be sent.
    pub async fn process(&self, msg: &InboundMessage) -> ParleyResult<Option<String>> {
        if msg.content.trim().is_empty() && msg.voice.is_none() {
            return Ok(None);
        }

        let _guard = self.locks.acquire(msg.sender_id).await;
        let mut user = self.load_user(msg.sender_id).await?;

        let transcript;
        let text = match &msg.voice {
            Some(audio) => {
                transcript = self.transcribe(&user, audio.clone()).await?;
                transcript.trim()
            }
            None => msg.content.trim(),
        };
        if text.is_empty() {
            return Ok(Some(NOTHING_HEARD.to_string()));
        }
        debug!("received: {}", truncate_chars(text, 80));

        if msg.voice.is_none()
            && let Some(caps) = RegexPatterns::chat_command().captures(text)
        {
            let command = caps.get(1).map_or("", |m| m.as_str());
            let args = caps.get(2).map_or("", |m| m.as_str().trim());
            return self.command(&mut user, msg.chat_id, command, args).await;
        }

        self.converse(user, msg.chat_id, text).await.map(Some)
    }

    /// Speech to text with the user's transcription provider.
    async fn transcribe(&self, user: &User, audio: Vec<u8>) -> ParleyResult<String> {
        let resolved = self.providers.for_user(user, Modality::Stt)?;
        let text = resolved
            .provider
            .transcribe(audio, resolved.model.as_deref())
            .await
            .map_err(classify)?;
        debug!("voice message transcribed to {} chars", text.chars().count());
        Ok(text)
    }

    async fn load_user(&self, user_id: i64) -> ParleyResult<User> {
        let mut user = self.storage.get_or_create_user(user_id).await?;
        if user.working_dir.is_none() {
            user.working_dir = Some(self.settings.workspace.join(user_id.to_string()));
            self.storage.save_user(&user).await?;
        }
        Ok(user)
    }

    async fn converse(&self, mut user: User, chat_id: i64, text: &str) -> ParleyResult<String> {
        let resolved = self.providers.for_user(&user, Modality::Chat)?;

        if self.settings.compaction.enabled {
            let compactor = MessageCompactor::new(resolved.provider.clone(), resolved.model.clone());
            if let Err(e) =
                compact_history(self.storage.as_ref(), &mut user, &compactor, &self.settings.compaction)
                    .await
            {
                warn!("history compaction for user {} failed: {:#}", user.id, e);
            }
        }

        let stored = self.storage.get_messages(&user).await?;
        let user_turn = Message::user(text);
        let mut history = Vec::with_capacity(stored.len() + 2);
        history.push(Message::system(self.system_prompt(&user)));
        history.extend(stored);
        history.push(user_turn.clone());

        let call = CallContext {
            user_id: Some(user.id),
            chat_id: Some(chat_id),
            working_dir: user.working_dir.clone(),
            outbound: Some(self.sink.clone()),
        };
        debug!(
            "user {} -> {} ({}), {} turns of history",
            user.id,
            resolved.provider.name(),
            resolved.model_name(),
            history.len()
        );
        let outcome = self
            .engine
            .get_chat_response(
                resolved.provider.as_ref(),
                resolved.model.as_deref(),
                history,
                &call,
            )
            .await?;

        // Tools may have written to the user (e.g. `remember`); persist onto the latest copy.
        let mut user = self.storage.get_or_create_user(user.id).await?;
        let ttl = self.settings.message_ttl;
        self.storage.add_message(&mut user, user_turn, ttl).await?;
        for message in outcome.new_messages {
            self.storage.add_message(&mut user, message, ttl).await?;
        }
        info!(
            "user {}: answered with {} input / {} output tokens",
            user.id, outcome.usage.input_tokens, outcome.usage.output_tokens
        );
        Ok(outcome.answer)
    }

    fn system_prompt(&self, user: &User) -> String {
        let mut prompt = self.settings.system_prompt.clone();
        if !user.info.trim().is_empty() {
            prompt.push_str("\n\nWhat you know about the user:\n");
            prompt.push_str(user.info.trim());
        }
        if let Some(summary) = user.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\nSummary of the earlier conversation:\n");
            prompt.push_str(summary);
        }
        prompt
    }

    async fn command(
        &self,
        user: &mut User,
        chat_id: i64,
        command: &str,
        args: &str,
    ) -> ParleyResult<Option<String>> {
        debug!("user {} ran /{}", user.id, command);
        let reply = match command {
            "start" => format!("Hi! Send me a message to start chatting.\n\n{}", HELP_TEXT),
            "help" => HELP_TEXT.to_string(),
            "reset" => {
                self.storage.drop_messages(user).await?;
                "Conversation cleared.".to_string()
            }
            "info" => {
                if user.info.trim().is_empty() {
                    "Nothing remembered yet.".to_string()
                } else {
                    format!("What I remember:\n{}", user.info.trim())
                }
            }
            "model" => self.select_model(user, args).await?,
            "models" => {
                let resolved = self.providers.for_user(user, Modality::Chat)?;
                let models = resolved
                    .provider
                    .available_models()
                    .await
                    .map_err(classify)?;
                if models.is_empty() {
                    format!("{} reported no models.", resolved.provider.name())
                } else {
                    format!("{} models:\n{}", resolved.provider.name(), models.join("\n"))
                }
            }
            "token" => self.set_token(user, args).await?,
            "image" => {
                if args.is_empty() {
                    return Ok(Some("Usage: /image <prompt>".to_string()));
                }
                let resolved = self.providers.for_user(user, Modality::Image)?;
                let images = resolved
                    .provider
                    .images(args, resolved.model.as_deref())
                    .await
                    .map_err(classify)?;
                if images.is_empty() {
                    return Ok(Some(GENERIC_FAILURE.to_string()));
                }
                for image in images {
                    self.sink.media(chat_id, image).await;
                }
                return Ok(None);
            }
            "say" => {
                if args.is_empty() {
                    return Ok(Some("Usage: /say <text>".to_string()));
                }
                let resolved = self.providers.for_user(user, Modality::Tts)?;
                let audio = resolved
                    .provider
                    .speech(args, "alloy", resolved.model.as_deref())
                    .await
                    .map_err(classify)?;
                self.sink.media(chat_id, audio).await;
                return Ok(None);
            }
            other => format!("Unknown command /{}. Try /help.", other),
        };
        Ok(Some(reply))
    }

    async fn select_model(&self, user: &mut User, args: &str) -> ParleyResult<String> {
        let mut parts = args.split_whitespace();
        let Some(provider) = parts.next() else {
            let resolved = self.providers.for_user(user, Modality::Chat)?;
            return Ok(format!(
                "Current model: {} ({}). Providers: {}",
                resolved.provider.name(),
                resolved.model_name(),
                self.providers.names().join(", ")
            ));
        };
        let model = parts.next().map(str::to_string);
        let token = user.api_tokens.get(provider).map(String::as_str);
        // Fails with a config error for unknown or unconfigured providers.
        let built = self.providers.get(provider, token)?;
        user.select(Modality::Chat, provider, model.clone());
        self.storage.save_user(user).await?;
        Ok(format!(
            "Chat model set to {} ({}).",
            provider,
            model.as_deref().unwrap_or_else(|| built.default_model())
        ))
    }

    async fn set_token(&self, user: &mut User, args: &str) -> ParleyResult<String> {
        let mut parts = args.split_whitespace();
        let Some(provider) = parts.next() else {
            return Ok("Usage: /token <provider> [key]".to_string());
        };
        let reply = match parts.next() {
            Some(key) => {
                let candidate = self.providers.get(provider, Some(key))?;
                if !candidate.api_key_is_valid().await {
                    return Ok(format!("{} rejected that key.", provider));
                }
                user.api_tokens.insert(provider.to_string(), key.to_string());
                format!("Using your own key for {}.", provider)
            }
            None => {
                user.api_tokens.remove(provider);
                format!("Removed your key for {}.", provider)
            }
        };
        self.storage.save_user(user).await?;
        Ok(reply)
    }
}
