//! Search result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// A single search result, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Identifier, unique within one aggregation.
    pub id: String,
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Result description/snippet.
    pub snippet: String,
    /// Lower-cased host of `url`.
    pub domain: String,
    /// Published date as reported by the provider.
    pub published_date: Option<String>,
    /// Provider-relative relevance; higher is better.
    pub score: f64,
    /// Provider that returned this result.
    pub provider: String,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    /// Creates a new search result. The domain is derived from the URL.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            title: title.into(),
            domain: extract_domain(&url),
            url,
            snippet: snippet.into(),
            published_date: None,
            score: 0.0,
            provider: String::new(),
            metadata: Map::new(),
        }
    }

    /// Sets the score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Sets the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Overrides the derived domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the published date.
    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = Some(date.into());
        self
    }

    /// Adds a metadata entry; `null` values are skipped.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        if !value.is_null() {
            self.metadata.insert(key.into(), value);
        }
        self
    }
}

/// Lower-cased host of a URL, or the lower-cased input if it has none.
pub fn extract_domain(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(str::to_lowercase)
            .unwrap_or_else(|| url.to_lowercase()),
        Err(_) => url.to_lowercase(),
    }
}

/// Combined response of one aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedResponse {
    /// Original query text.
    pub query: String,
    /// Deduplicated results, sorted by descending score.
    pub results: Vec<SearchResult>,
    /// Number of entries in `results`.
    pub total_results: usize,
    /// Every provider that was asked.
    pub queried_providers: Vec<String>,
    /// Providers that failed or timed out.
    pub failed_providers: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl AggregatedResponse {
    /// Returns the results.
    pub fn items(&self) -> &[SearchResult] {
        &self.results
    }

    /// True when at least one provider failed.
    pub fn is_degraded(&self) -> bool {
        !self.failed_providers.is_empty()
    }
}

/// Availability of one provider, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub available: bool,
}
