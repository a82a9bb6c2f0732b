pub mod anthropic;
pub mod base;
pub mod errors;
pub mod openai;
pub mod registry;

pub use registry::ProviderRegistry;

use reqwest::Client;
use std::time::Duration;

/// Connect timeout for LLM provider HTTP clients (seconds).
pub(crate) const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Overall request timeout for LLM provider HTTP clients (seconds).
pub(crate) const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Build a `reqwest::Client` with standard provider timeouts (30 s connect, 120 s overall).
pub(crate) fn provider_http_client() -> Client {
    provider_http_client_with_timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
}

pub(crate) fn provider_http_client_with_timeout(request_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
        .timeout(request_timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}
