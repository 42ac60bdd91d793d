//! Perplexity answer engine provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::provider::{check_status, probe_outcome};
use crate::retry::retry;
use crate::{
    Provider, ProviderConfig, Result, SearchError, SearchQuery, SearchResult, TimeRange,
};

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "llama-3.1-sonar-small-128k-online";
const SYSTEM_PROMPT: &str =
    "You are a helpful search assistant. Provide accurate information with citations.";

/// Score of the synthesized answer.
const ANSWER_SCORE: f64 = 1.0;
/// Score of the first citation; each further citation scores 0.1 less.
const FIRST_CITATION_SCORE: f64 = 0.5;
const CITATION_STEP: f64 = 0.1;

/// Generative-answer provider backed by the Perplexity chat API.
///
/// Produces one synthesized answer result followed by one result per
/// citation.
pub struct Perplexity {
    config: ProviderConfig,
    client: Client,
}

impl Perplexity {
    /// Provider name used in results and reports.
    pub const NAME: &'static str = "perplexity";

    /// Creates a new Perplexity provider with default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ProviderConfig::new(Self::NAME, api_key))
    }

    /// Creates with custom configuration.
    pub fn with_config(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint(DEFAULT_BASE_URL))
    }

    fn model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(&ChatRequest::from_query(self.model(), query))
            .send()
            .await?;
        let response = check_status(self.name(), response)?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(format!("perplexity: {}", e)))?;

        Ok(self.transform_results(body))
    }

    fn transform_results(&self, response: ChatResponse) -> Vec<SearchResult> {
        let mut results = Vec::new();

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty());
        if let Some(content) = answer {
            results.push(
                SearchResult::new(
                    format!("perplexity_{}", response.id.unwrap_or_default()),
                    "",
                    "AI Answer",
                    content,
                )
                    .with_domain("perplexity.ai")
                    .with_score(ANSWER_SCORE)
                    .with_provider(self.name()),
            );
        }

        for (index, citation) in response.citations.into_iter().enumerate() {
            if Url::parse(&citation).is_err() {
                continue;
            }
            results.push(
                SearchResult::new(
                    format!("perplexity_citation_{}", index),
                    citation,
                    format!("Source {}", index + 1),
                    "",
                )
                .with_score(FIRST_CITATION_SCORE - index as f64 * CITATION_STEP)
                .with_provider(self.name()),
            );
        }

        results
    }
}

fn recency_filter(range: TimeRange) -> &'static str {
    match range {
        TimeRange::Day => "day",
        TimeRange::Week => "week",
        TimeRange::Month => "month",
        TimeRange::Year => "year",
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    return_citations: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_domain_filter: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<&'static str>,
}

impl ChatRequest {
    fn from_query(model: &str, query: &SearchQuery) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: query.query.clone(),
                },
            ],
            max_tokens: 1000,
            temperature: 0.2,
            top_p: 0.9,
            return_citations: true,
            search_domain_filter: query.site.clone().map(|site| vec![site]),
            search_recency_filter: query.time_range.map(recency_filter),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    id: Option<String>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl Provider for Perplexity {
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
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.model(),
                "messages": [{ "role": "user", "content": "hi" }],
                "max_tokens": 1
            }))
            .send()
            .await;
        probe_outcome(self.name(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> Perplexity {
        let config = ProviderConfig::new(Perplexity::NAME, "test-key")
            .with_base_url(server.uri())
            .with_retry(RetryPolicy::provider_default().with_base_delay(Duration::from_millis(1)));
        Perplexity::with_config(config).unwrap()
    }

    #[test]
    fn test_perplexity_new() {
        let provider = Perplexity::new("key").unwrap();
        assert_eq!(provider.name(), "perplexity");
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(provider.url(), "https://api.perplexity.ai/chat/completions");
    }

    #[test]
    fn test_custom_model() {
        let config = ProviderConfig::new(Perplexity::NAME, "key").with_model("sonar-pro");
        let provider = Perplexity::with_config(config).unwrap();
        assert_eq!(provider.model(), "sonar-pro");
    }

    #[test]
    fn test_request_mapping() {
        let query = SearchQuery::new("who maintains tokio")
            .with_site("github.com")
            .with_time_range(TimeRange::Month);
        let body = serde_json::to_value(ChatRequest::from_query("m", &query)).unwrap();
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "who maintains tokio");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["return_citations"], true);
        assert_eq!(body["search_domain_filter"], json!(["github.com"]));
        assert_eq!(body["search_recency_filter"], "month");
    }

    #[tokio::test]
    async fn test_search_builds_answer_and_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"return_citations": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "abc123",
                "model": "llama-3.1-sonar-small-128k-online",
                "object": "chat.completion",
                "created": 1700000000,
                "citations": [
                    "https://tokio.rs/",
                    "not a url",
                    "https://GitHub.com/tokio-rs/tokio"
                ],
                "choices": [{
                    "index": 0,
                    "finish_reason": "stop",
                    "message": {"role": "assistant", "content": "Tokio is maintained by..."}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = provider(&server)
            .search(&SearchQuery::new("who maintains tokio"))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "perplexity_abc123");
        assert_eq!(results[0].title, "AI Answer");
        assert_eq!(results[0].url, "");
        assert_eq!(results[0].domain, "perplexity.ai");
        assert_eq!(results[0].score, 1.0);

        assert_eq!(results[1].id, "perplexity_citation_0");
        assert_eq!(results[1].title, "Source 1");
        assert_eq!(results[1].domain, "tokio.rs");
        assert_eq!(results[1].score, 0.5);

        assert_eq!(results[2].id, "perplexity_citation_2");
        assert_eq!(results[2].title, "Source 3");
        assert_eq!(results[2].domain, "github.com");
        assert!((results[2].score - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_without_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "x", "choices": []})),
            )
            .mount(&server)
            .await;

        let results = provider(&server).search(&SearchQuery::new("q")).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_null_answer_keeps_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": null,
                "choices": [{"message": {"role": "assistant", "content": null}}],
                "citations": ["https://tokio.rs/"]
            })))
            .mount(&server)
            .await;

        let results = provider(&server).search(&SearchQuery::new("q")).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "perplexity_citation_0");
        assert_eq!(results[0].url, "https://tokio.rs/");
    }

    #[tokio::test]
    async fn test_search_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).search(&SearchQuery::new("q")).await.unwrap_err();
        assert!(matches!(err, SearchError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_is_available() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"max_tokens": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "p"})))
            .mount(&server)
            .await;
        assert!(provider(&server).is_available().await);
    }
}
