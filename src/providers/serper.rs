//! Serper (Google results API) provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::provider::{check_status, probe_outcome};
use crate::retry::retry;
use crate::{Provider, ProviderConfig, Result, SearchError, SearchQuery, SearchResult};

const DEFAULT_BASE_URL: &str = "https://google.serper.dev";

/// Web-index provider backed by the Serper API.
pub struct Serper {
    config: ProviderConfig,
    client: Client,
}

impl Serper {
    /// Provider name used in results and reports.
    pub const NAME: &'static str = "serper";

    /// Creates a new Serper provider with default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ProviderConfig::new(Self::NAME, api_key))
    }

    /// Creates with custom configuration.
    pub fn with_config(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!("{}/search", self.config.endpoint(DEFAULT_BASE_URL))
    }

    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(self.url())
            .header("X-API-KEY", &self.config.api_key)
            .json(&SerperRequest::from_query(query))
            .send()
            .await?;
        let response = check_status(self.name(), response)?;
        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(format!("serper: {}", e)))?;

        Ok(self.transform_results(body.organic))
    }

    fn transform_results(&self, organic: Vec<SerperResult>) -> Vec<SearchResult> {
        organic
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let Some(link) = item.link.filter(|link| !link.is_empty()) else {
                    debug!("Skipping serper result {} without a link", index + 1);
                    return None;
                };
                let position = item.position.filter(|p| *p > 0).unwrap_or(index as u32 + 1);
                let mut result = SearchResult::new(
                    format!("serper_{}", position),
                    link,
                    item.title.unwrap_or_default(),
                    item.snippet.unwrap_or_default(),
                )
                .with_score(1.0 / position as f64)
                .with_provider(self.name());
                if let Some(date) = item.date {
                    result = result.with_published_date(date);
                }
                if let Some(sitelinks) = item.sitelinks {
                    result = result.with_metadata("sitelinks", sitelinks);
                }
                Some(result)
            })
            .collect()
    }
}

#[derive(Serialize)]
struct SerperRequest {
    q: String,
    num: u32,
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    hl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tbs: Option<String>,
}

impl SerperRequest {
    fn from_query(query: &SearchQuery) -> Self {
        let q = match &query.site {
            Some(site) => format!("site:{} {}", site, query.query),
            None => query.query.clone(),
        };
        Self {
            q,
            num: query.limit,
            page: query.page(),
            hl: query.language.clone(),
            tbs: query.time_range.map(|range| format!("qdr:{}", range.code())),
        }
    }
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Deserialize)]
struct SerperResult {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
    date: Option<String>,
    sitelinks: Option<Value>,
    position: Option<u32>,
}

#[async_trait]
impl Provider for Serper {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        retry(&self.config.retry, || self.execute(query)).await
    }

    async fn is_available(&self) -> bool {
        let outcome = self
            .client
            .post(self.url())
            .header("X-API-KEY", &self.config.api_key)
            .json(&serde_json::json!({ "q": "test", "num": 1 }))
            .send()
            .await;
        probe_outcome(self.name(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::TimeRange;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> Serper {
        let config = ProviderConfig::new(Serper::NAME, "test-key")
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::provider_default().with_base_delay(Duration::from_millis(1)));
        Serper::with_config(config).unwrap()
    }

    fn organic_body() -> Value {
        json!({
            "searchParameters": {"q": "rust"},
            "organic": [
                {
                    "title": "Rust Programming Language",
                    "link": "https://www.Rust-Lang.org/",
                    "snippet": "A language empowering everyone.",
                    "position": 1,
                    "sitelinks": [{"title": "Learn", "link": "https://www.rust-lang.org/learn"}]
                },
                {
                    "title": "The Rust Book",
                    "link": "https://doc.rust-lang.org/book/",
                    "snippet": "Official guide.",
                    "date": "Jan 3, 2024",
                    "position": 2
                },
                {
                    "title": "No position",
                    "link": "https://example.com/third"
                }
            ]
        })
    }

    #[test]
    fn test_serper_new() {
        let provider = Serper::new("key").unwrap();
        assert_eq!(provider.name(), "serper");
        assert!(provider.is_enabled());
        assert_eq!(provider.url(), "https://google.serper.dev/search");
    }

    #[test]
    fn test_request_mapping() {
        let query = SearchQuery::new("async traits")
            .with_limit(5)
            .with_offset(10)
            .with_language("de")
            .with_time_range(TimeRange::Week)
            .with_site("docs.rs");
        let body = serde_json::to_value(SerperRequest::from_query(&query)).unwrap();
        assert_eq!(
            body,
            json!({"q": "site:docs.rs async traits", "num": 5, "page": 3, "hl": "de", "tbs": "qdr:w"})
        );
    }

    #[test]
    fn test_request_mapping_minimal() {
        let body = serde_json::to_value(SerperRequest::from_query(&SearchQuery::new("rust"))).unwrap();
        assert_eq!(body, json!({"q": "rust", "num": 10, "page": 1}));
    }

    #[tokio::test]
    async fn test_search_normalizes_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "test-key"))
            .and(body_partial_json(json!({"q": "rust", "num": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(organic_body()))
            .expect(1)
            .mount(&server)
            .await;

        let results = provider(&server).search(&SearchQuery::new("rust")).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "serper_1");
        assert_eq!(results[0].domain, "www.rust-lang.org");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[0].provider, "serper");
        assert!(results[0].metadata.contains_key("sitelinks"));
        assert_eq!(results[1].score, 0.5);
        assert_eq!(results[1].published_date.as_deref(), Some("Jan 3, 2024"));
        assert_eq!(results[2].id, "serper_3");
        assert!((results[2].score - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(results[2].snippet, "");
    }

    #[tokio::test]
    async fn test_search_skips_entries_without_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Knowledge panel", "snippet": "no link here", "position": 1},
                    {"title": null, "link": "https://tokio.rs/", "snippet": null, "position": 2}
                ]
            })))
            .mount(&server)
            .await;

        let results = provider(&server).search(&SearchQuery::new("tokio")).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "serper_2");
        assert_eq!(results[0].url, "https://tokio.rs/");
        assert_eq!(results[0].title, "");
        assert_eq!(results[0].snippet, "");
    }

    #[tokio::test]
    async fn test_search_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).search(&SearchQuery::new("rust")).await.unwrap_err();
        assert!(matches!(err, SearchError::Authentication { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_search_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = provider(&server).search(&SearchQuery::new("rust")).await.unwrap_err();
        match err {
            SearchError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, SearchError::Api { status: 503, .. }));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).search(&SearchQuery::new("rust")).await.unwrap_err();
        assert!(matches!(err, SearchError::Api { status: 400, retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_is_available() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"num": 1})))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        assert!(provider(&server).is_available().await);
    }

    #[tokio::test]
    async fn test_is_available_rejects_bad_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        assert!(!provider(&server).is_available().await);
    }
}
