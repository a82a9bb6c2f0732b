use crate::config::{Config, ProvidersConfig};
use crate::errors::{ParleyError, ParleyResult};
use crate::providers::anthropic::{self, AnthropicProvider};
use crate::providers::base::LLMProvider;
use crate::providers::openai::{self, OpenAIProvider};
use crate::storage::{Modality, User};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Provider and model resolved for one request.
#[derive(Clone)]
pub struct Resolved {
    pub provider: Arc<dyn LLMProvider>,
    /// `None` means the provider's own default.
    pub model: Option<String>,
}

impl Resolved {
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

/// Builds providers from config, honoring per-user selections and tokens.
pub struct ProviderRegistry {
    config: ProvidersConfig,
    default_provider: String,
    default_model: Option<String>,
    request_timeout: Duration,
    /// Providers built from configured keys, plus any installed directly.
    instances: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.providers.clone(),
            default_provider: config.agent.provider.clone(),
            default_model: config.agent.model.clone(),
            request_timeout: Duration::from_secs(config.agent.request_timeout_secs),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Install a ready-made provider under `name`, bypassing key lookup.
    pub fn install(&self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        if let Ok(mut instances) = self.instances.lock() {
            instances.insert(name.into(), provider);
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.config.names();
        if let Ok(instances) = self.instances.lock() {
            for name in instances.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Provider by name. A user token, when given, wins over the configured key.
    pub fn get(&self, name: &str, user_token: Option<&str>) -> ParleyResult<Arc<dyn LLMProvider>> {
        if let Some(token) = user_token.filter(|t| !t.is_empty()) {
            return self.build(name, token);
        }

        if let Ok(instances) = self.instances.lock()
            && let Some(provider) = instances.get(name)
        {
            return Ok(provider.clone());
        }

        let key = self
            .config
            .get(name)
            .map(|c| c.api_key.clone())
            .ok_or_else(|| ParleyError::Config(format!("Unknown provider '{}'.", name)))?;
        if key.is_empty() {
            return Err(ParleyError::Config(format!(
                "No API key configured for {}. Set providers.{}.apiKey in the config.",
                name, name
            )));
        }
        let provider = self.build(name, &key)?;
        if let Ok(mut instances) = self.instances.lock() {
            instances.insert(name.to_string(), provider.clone());
        }
        Ok(provider)
    }

    /// The user's selection for `modality`, or the configured default.
    pub fn for_user(&self, user: &User, modality: Modality) -> ParleyResult<Resolved> {
        let (name, model) = match user.selection(modality) {
            Some(selection) => (selection.provider.clone(), selection.model.clone()),
            // The configured default model is a chat model; other modalities
            // fall back to the provider's own defaults.
            None if modality == Modality::Chat => {
                (self.default_provider.clone(), self.default_model.clone())
            }
            None => (self.default_provider.clone(), None),
        };
        let token = user.api_tokens.get(&name).map(String::as_str);
        let provider = self.get(&name, token)?;
        Ok(Resolved { provider, model })
    }

    fn build(&self, name: &str, api_key: &str) -> ParleyResult<Arc<dyn LLMProvider>> {
        let entry = self
            .config
            .get(name)
            .ok_or_else(|| ParleyError::Config(format!("Unknown provider '{}'.", name)))?;
        debug!("building provider {}", name);
        let provider: Arc<dyn LLMProvider> = match name {
            "anthropic" => Arc::new(
                AnthropicProvider::with_base_url(
                    api_key.to_string(),
                    entry.default_model.clone(),
                    entry
                        .api_base
                        .clone()
                        .unwrap_or_else(|| anthropic::DEFAULT_API_BASE.to_string()),
                )
                .with_request_timeout(self.request_timeout),
            ),
            _ => Arc::new(
                OpenAIProvider::with_config(
                    api_key.to_string(),
                    entry
                        .default_model
                        .clone()
                        .unwrap_or_else(|| openai::DEFAULT_MODEL.to_string()),
                    entry
                        .api_base
                        .clone()
                        .unwrap_or_else(|| openai::DEFAULT_API_BASE.to_string()),
                    name.to_string(),
                )
                .with_request_timeout(self.request_timeout),
            ),
        };
        Ok(provider)
    }
}
