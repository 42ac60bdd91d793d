//! Provider trait and configuration.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{Result, SearchError, SearchQuery, SearchResult};

const USER_AGENT: &str = concat!("plaza-search/", env!("CARGO_PKG_VERSION"));

/// Configuration for a search provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name of the provider.
    #[serde(default)]
    pub name: String,
    /// API key sent with every request.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether the provider is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Backoff applied to each search call.
    #[serde(default = "RetryPolicy::provider_default")]
    pub retry: RetryPolicy,
    /// Model name, for providers that answer with a language model.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_enabled() -> bool {
    true
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("enabled", &self.enabled)
            .field("retry", &self.retry)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderConfig {
    /// Creates an enabled configuration with default timeout and retry policy.
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: None,
            timeout_ms: default_timeout_ms(),
            enabled: true,
            retry: RetryPolicy::provider_default(),
            model: None,
        }
    }

    /// Sets the endpoint base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enables or disables the provider.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enabled and holding a credential.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }

    /// Base URL without a trailing slash, falling back to `default`.
    pub fn endpoint(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn http_client(&self) -> Result<Client> {
        Ok(Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout())
            .build()?)
    }
}

/// Trait for implementing search providers.
///
/// Each external query source implements this trait to take part in
/// aggregation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider configuration.
    fn config(&self) -> &ProviderConfig;

    /// Performs a search and returns normalized results.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>>;

    /// Cheap probe used for health reporting only.
    async fn is_available(&self) -> bool;

    /// Returns the provider name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns whether the provider is enabled.
    fn is_enabled(&self) -> bool {
        self.config().enabled
    }
}

/// Maps a non-success status to the matching error.
///
/// 401/403 are fatal authentication failures, 5xx may be retried, and any
/// other failure status is treated as fatal.
pub(crate) fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(status_error(provider, status))
}

pub(crate) fn status_error(provider: &str, status: StatusCode) -> SearchError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return SearchError::Authentication {
            provider: provider.to_string(),
            status: status.as_u16(),
        };
    }
    SearchError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
        retryable: status.is_server_error(),
    }
}

/// Interprets the outcome of an availability probe.
pub(crate) fn probe_outcome(provider: &str, outcome: reqwest::Result<Response>) -> bool {
    match outcome {
        Ok(response) => {
            let status = response.status();
            debug!("Provider {} probe answered {}", provider, status);
            status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN
        }
        Err(e) => {
            debug!("Provider {} probe failed: {}", provider, e);
            false
        }
    }
}
