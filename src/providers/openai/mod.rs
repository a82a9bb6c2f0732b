use crate::providers::base::{
    ChatRequest, FunctionCall, LLMProvider, LLMResponse, Media, Message, MessageCodec, Role,
    ToolCall, Usage,
};
use crate::providers::errors::ProviderErrorHandler;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Chat-completions wire format: one native message per canonical turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAICodec;

impl MessageCodec for OpenAICodec {
    fn encode(&self, messages: &[Message]) -> Value {
        Value::Array(messages.iter().map(encode_message).collect())
    }

    fn decode(&self, native: &Value) -> Result<Vec<Message>> {
        native
            .as_array()
            .context("chat-completions history must be an array")?
            .iter()
            .map(decode_message)
            .collect()
    }
}

fn encode_message(msg: &Message) -> Value {
    let content = if msg.role == Role::Assistant && msg.content.is_empty() && msg.has_tool_calls() {
        Value::Null
    } else {
        json!(msg.content)
    };
    let mut m = json!({
        "role": msg.role.as_str(),
        "content": content,
    });

    if let Some(tool_calls) = msg.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
        m["tool_calls"] = Value::Array(
            tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.function.name,
                            "arguments": tc.function.arguments,
                        }
                    })
                })
                .collect(),
        );
    }

    if let Some(ref tool_call_id) = msg.tool_call_id {
        m["tool_call_id"] = json!(tool_call_id);
    }

    m
}

fn decode_message(native: &Value) -> Result<Message> {
    let role_str = native["role"].as_str().context("message without a role")?;
    let role = Role::parse(role_str)
        .with_context(|| format!("unsupported chat-completions role '{}'", role_str))?;
    let content = native["content"].as_str().unwrap_or_default().to_string();
    let tool_calls = native["tool_calls"]
        .as_array()
        .map(|calls| calls.iter().map(decode_tool_call).collect::<Vec<_>>())
        .filter(|calls| !calls.is_empty());
    let tool_call_id = native["tool_call_id"].as_str().map(str::to_string);

    Ok(Message {
        id: None,
        role,
        content,
        tool_calls,
        tool_call_id,
        expire_at: None,
    })
}

fn decode_tool_call(tc: &Value) -> ToolCall {
    let function = &tc["function"];
    // Some compatible servers send arguments as an object instead of a string.
    let arguments = match &function["arguments"] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    ToolCall {
        id: tc["id"].as_str().unwrap_or_default().to_string(),
        function: FunctionCall {
            name: function["name"].as_str().unwrap_or_default().to_string(),
            arguments,
        },
    }
}

/// Any OpenAI-compatible endpoint (OpenAI, OpenRouter, Groq, a local server).
pub struct OpenAIProvider {
    api_key: String,
    default_model: String,
    api_base: String,
    provider_name: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_config(
            api_key,
            default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            DEFAULT_API_BASE.to_string(),
            "openai".to_string(),
        )
    }

    pub fn with_config(
        api_key: String,
        default_model: String,
        api_base: String,
        provider_name: String,
    ) -> Self {
        Self {
            api_key,
            default_model,
            api_base: api_base.trim_end_matches('/').to_string(),
            provider_name,
            client: super::provider_http_client(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.client = super::provider_http_client_with_timeout(timeout);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn parse_response(json: &Value) -> Result<LLMResponse> {
        let choice = json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .context("No choices in chat-completions response")?;

        let message = &choice["message"];
        let decoded = decode_message(&json!({
            "role": "assistant",
            "content": message["content"],
            "tool_calls": message["tool_calls"],
        }))?;

        let usage = Usage {
            input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(LLMResponse {
            content: message["content"].as_str().map(str::to_string),
            tool_calls: decoded.tool_calls.unwrap_or_default(),
            reasoning_content: message["reasoning_content"]
                .as_str()
                .or_else(|| message["reasoning"].as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            usage,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<LLMResponse> {
        let model = req.model.unwrap_or(&self.default_model);
        debug!("{} chat: model={}", self.provider_name, model);

        let mut payload = json!({
            "model": model,
            "messages": OpenAICodec.encode(&req.messages),
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        if let Some(tools) = req.tools.filter(|t| !t.is_empty()) {
            payload["tools"] = json!(
                tools
                    .into_iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    }))
                    .collect::<Vec<_>>()
            );
            if let Some(ref choice) = req.tool_choice {
                payload["tool_choice"] = json!(choice);
            }
        }

        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {} API", self.provider_name))?;

        let json = ProviderErrorHandler::check_response(resp, &self.provider_name).await?;
        let response = Self::parse_response(&json)
            .map_err(|e| ProviderErrorHandler::malformed(&self.provider_name, format!("{:#}", e)))?;
        debug!(
            "{} chat complete: input_tokens={}, output_tokens={}",
            self.provider_name, response.usage.input_tokens, response.usage.output_tokens
        );
        Ok(response)
    }

    async fn available_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.url("/models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to list {} models", self.provider_name))?;
        let json = ProviderErrorHandler::check_response(resp, &self.provider_name).await?;
        let mut models: Vec<String> = json["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        models.sort();
        Ok(models)
    }

    async fn images(&self, prompt: &str, model: Option<&str>) -> Result<Vec<Media>> {
        let resp = self
            .client
            .post(self.url("/images/generations"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model.unwrap_or("dall-e-3"),
                "prompt": prompt,
                "n": 1,
                "response_format": "url",
            }))
            .send()
            .await
            .context("Failed to send image generation request")?;
        let json = ProviderErrorHandler::check_response(resp, &self.provider_name).await?;
        Ok(json["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|img| img["url"].as_str())
                    .map(|url| Media::Image {
                        url: Some(url.to_string()),
                        data: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn speech(&self, text: &str, voice: &str, model: Option<&str>) -> Result<Media> {
        let resp = self
            .client
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model.unwrap_or("tts-1"),
                "input": text,
                "voice": voice,
            }))
            .send()
            .await
            .context("Failed to send speech request")?;
        let resp = ProviderErrorHandler::check_http_status(resp, &self.provider_name).await?;
        let data = resp.bytes().await.context("Failed to read speech audio")?;
        Ok(Media::Audio {
            data: data.to_vec(),
            mime_type: "audio/mpeg".to_string(),
        })
    }

    async fn transcribe(&self, audio: Vec<u8>, model: Option<&str>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.ogg")
            .mime_str("audio/ogg")?;
        let form = reqwest::multipart::Form::new()
            .text("model", model.unwrap_or("whisper-1").to_string())
            .part("file", part);
        let resp = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to send transcription request")?;
        let json = ProviderErrorHandler::check_response(resp, &self.provider_name).await?;
        json["text"]
            .as_str()
            .map(str::to_string)
            .context("transcription response without text")
    }
}
