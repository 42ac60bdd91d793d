//! Exa neural document search provider implementation.

use async_trait::async_trait;
use chrono::{Days, Months, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::provider::{check_status, probe_outcome};
use crate::retry::retry;
use crate::{
    Provider, ProviderConfig, Result, SearchError, SearchQuery, SearchResult, TimeRange,
};

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";
const SNIPPET_CHARS: usize = 500;

/// Document-retrieval provider backed by the Exa API.
///
/// Exa has no language or pagination parameters; those query fields are
/// ignored. Time ranges become a published-after date and sites become a
/// domain allow-list.
pub struct Exa {
    config: ProviderConfig,
    client: Client,
}

impl Exa {
    /// Provider name used in results and reports.
    pub const NAME: &'static str = "exa";

    /// Creates a new Exa provider with default settings.
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
        let request = ExaRequest::from_query(query, Utc::now().date_naive());
        let response = self
            .client
            .post(self.url())
            .header("x-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(self.name(), response)?;
        let body: ExaResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(format!("exa: {}", e)))?;

        Ok(self.transform_results(body.results))
    }

    fn transform_results(&self, results: Vec<ExaResult>) -> Vec<SearchResult> {
        results
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let Some(url) = item.url.filter(|url| !url.is_empty()) else {
                    debug!("Skipping exa result {} without a url", index + 1);
                    return None;
                };
                let id = match item.id {
                    Some(id) if !id.is_empty() => id,
                    _ => format!("exa_{}", index),
                };
                let title = match item.title {
                    Some(title) if !title.trim().is_empty() => title,
                    _ => "Untitled".to_string(),
                };
                let snippet: String = item
                    .text
                    .unwrap_or_default()
                    .chars()
                    .take(SNIPPET_CHARS)
                    .collect();
                let score = item.score.unwrap_or(1.0 / (index + 1) as f64);

                let mut result = SearchResult::new(id, url, title, snippet)
                    .with_score(score)
                    .with_provider(self.name())
                    .with_metadata("author", item.author.map(Value::String).unwrap_or(Value::Null))
                    .with_metadata("highlights", item.highlights.unwrap_or(Value::Null));
                if let Some(date) = item.published_date {
                    result = result.with_published_date(date);
                }
                Some(result)
            })
            .collect()
    }
}

/// First day of the window covered by `range`, as `YYYY-MM-DD`.
fn start_published_date(range: TimeRange, today: NaiveDate) -> String {
    let start = match range {
        TimeRange::Day => today.checked_sub_days(Days::new(1)),
        TimeRange::Week => today.checked_sub_days(Days::new(7)),
        TimeRange::Month => today.checked_sub_months(Months::new(1)),
        TimeRange::Year => today.checked_sub_months(Months::new(12)),
    };
    start.unwrap_or(today).format("%Y-%m-%d").to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaRequest {
    query: String,
    num_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<Vec<String>>,
    contents: ExaContents,
}

#[derive(Serialize)]
struct ExaContents {
    text: bool,
    highlights: bool,
}

impl ExaRequest {
    fn from_query(query: &SearchQuery, today: NaiveDate) -> Self {
        Self {
            query: query.query.clone(),
            num_results: query.limit,
            start_published_date: query
                .time_range
                .map(|range| start_published_date(range, today)),
            include_domains: query.site.clone().map(|site| vec![site]),
            contents: ExaContents {
                text: true,
                highlights: true,
            },
        }
    }
}

#[derive(Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaResult {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    published_date: Option<String>,
    author: Option<String>,
    score: Option<f64>,
    text: Option<String>,
    highlights: Option<Value>,
}

#[async_trait]
impl Provider for Exa {
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
            .header("x-api-key", &self.config.api_key)
            .json(&serde_json::json!({ "query": "test", "numResults": 1 }))
            .send()
            .await;
        probe_outcome(self.name(), outcome)
    }
}
