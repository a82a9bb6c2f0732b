use crate::errors::ParleyError;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

/// HTTP status and body classification shared by every provider.
pub struct ProviderErrorHandler;

impl ProviderErrorHandler {
    /// Parse an API error body into a typed error.
    pub fn parse_api_error(status: u16, error_text: &str) -> ParleyError {
        let retryable = matches!(status, 500 | 502 | 503 | 504 | 529);
        if let Ok(error_json) = serde_json::from_str::<Value>(error_text)
            && let Some(err) = error_json.get("error")
        {
            let error_type = err
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let error_msg = err
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");

            if error_type == "not_found_error" || err.get("code").and_then(Value::as_str) == Some("model_not_found") {
                return ParleyError::Config(format!(
                    "Model not found: {}. Pick another one with /model.",
                    error_msg
                ));
            }

            return ParleyError::Provider {
                message: format!("API error ({}): {}", error_type, error_msg),
                retryable,
            };
        }

        ParleyError::Provider {
            message: format!("API error ({}): {}", status, error_text),
            retryable,
        }
    }

    pub fn rate_limited(retry_after: Option<u64>) -> ParleyError {
        if let Some(seconds) = retry_after {
            warn!("Rate limit hit. Retry after {} seconds", seconds);
        } else {
            warn!("Rate limit hit");
        }
        ParleyError::RateLimit { retry_after }
    }

    /// A 2xx body that cannot be turned into a completion.
    pub fn malformed(provider: &str, detail: impl std::fmt::Display) -> ParleyError {
        warn!("{} sent a malformed response: {}", provider, detail);
        ParleyError::Provider {
            message: format!("{} sent a malformed response: {}", provider, detail),
            retryable: true,
        }
    }

    pub fn auth_failed(provider: &str, status: u16, error_text: &str) -> ParleyError {
        warn!(
            "{} authentication error (status: {}): {}",
            provider, status, error_text
        );
        ParleyError::Auth(provider.to_string())
    }

    /// Check HTTP status and return a typed error if the response is not successful.
    /// On error, consumes the response body to extract error details.
    pub async fn check_http_status(
        resp: reqwest::Response,
        provider: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let error_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        error!("{} provider returned HTTP {}", provider, status.as_u16());

        if status == 429 {
            return Err(Self::rate_limited(retry_after).into());
        }
        if status == 401 || status == 403 {
            return Err(Self::auth_failed(provider, status.as_u16(), &error_text).into());
        }
        Err(Self::parse_api_error(status.as_u16(), &error_text).into())
    }

    /// Check status, decode the JSON body, and surface API-level `error` objects.
    pub async fn check_response(resp: reqwest::Response, provider: &str) -> Result<Value, anyhow::Error> {
        let resp = Self::check_http_status(resp, provider).await?;

        let json: Value = resp
            .json()
            .await
            .map_err(|e| Self::malformed(provider, e))?;

        if let Some(error_val) = json.get("error")
            && !error_val.is_null()
        {
            let error_text =
                serde_json::to_string(&serde_json::json!({"error": error_val}))
                    .unwrap_or_else(|_| "Unknown error".to_string());
            error!("{} returned an error object in a 200 response", provider);
            return Err(Self::parse_api_error(200, &error_text).into());
        }

        Ok(json)
    }
}

/// Maps any failure from a provider call onto the error taxonomy.
///
/// The conversation engine calls this at its single provider call site.
pub fn map_provider_error(err: anyhow::Error, provider: &str, request_timeout: Duration) -> ParleyError {
    let err = match err.downcast::<ParleyError>() {
        Ok(typed) => return typed,
        Err(other) => other,
    };
    if let Some(req_err) = err.chain().find_map(|e| e.downcast_ref::<reqwest::Error>()) {
        if req_err.is_timeout() {
            return ParleyError::Timeout {
                operation: format!("{} request", provider),
                after: request_timeout,
            };
        }
        if req_err.is_connect() || req_err.is_request() {
            return ParleyError::Provider {
                message: format!("{} unreachable: {}", provider, req_err),
                retryable: true,
            };
        }
        if req_err.is_decode() {
            return ParleyError::Provider {
                message: format!("{} sent a malformed response: {}", provider, req_err),
                retryable: true,
            };
        }
    }
    ParleyError::Internal(err)
}
