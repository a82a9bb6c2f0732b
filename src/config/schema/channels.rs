use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// Telegram user ids or usernames allowed to talk to the bot. Empty allows everyone.
    #[serde(default, rename = "allowFrom")]
    pub allow_from: Vec<String>,
}

redact_debug!(TelegramConfig, enabled, redact(token), allow_from,);
