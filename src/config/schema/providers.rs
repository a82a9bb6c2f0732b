use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
    #[serde(default, rename = "defaultModel")]
    pub default_model: Option<String>,
}

redact_debug!(ProviderConfig, redact(api_key), api_base, default_model,);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
    /// Extra OpenAI-compatible endpoints keyed by the name users select them by.
    #[serde(default)]
    pub compatible: BTreeMap<String, ProviderConfig>,
}

impl ProvidersConfig {
    /// Every selectable provider name, built-ins first.
    pub fn names(&self) -> Vec<String> {
        let mut names = vec!["openai".to_string(), "anthropic".to_string()];
        names.extend(self.compatible.keys().cloned());
        names
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "openai" => Some(&self.openai),
            "anthropic" => Some(&self.anthropic),
            other => self.compatible.get(other),
        }
    }
}
