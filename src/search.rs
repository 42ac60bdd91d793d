//! Search orchestration.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::limiter::{self, Limiter, LimiterConfig};
use crate::{
    AggregatedResponse, Aggregator, Provider, ProviderStatus, Result, SearchError, SearchQuery,
    SearchResult,
};

/// Default per-provider time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Aggregation engine that fans a query out to every configured provider.
///
/// Each provider call is admitted through the search-domain [`Limiter`] and
/// raced against the per-provider timeout. Failures and timeouts are
/// reported in [`AggregatedResponse::failed_providers`] instead of failing
/// the whole search. Dropping an in-flight [`search`](Self::search) aborts
/// its provider calls.
pub struct Search {
    providers: Vec<Arc<dyn Provider>>,
    aggregator: Aggregator,
    timeout: Duration,
    limiter: Limiter,
    audit: Option<AuditLog>,
}

enum Outcome {
    Results(Vec<SearchResult>),
    Failed(SearchError),
}

impl Search {
    /// Creates a search instance admitting provider calls through `limiter`.
    pub fn new(limiter: Limiter) -> Self {
        Self {
            providers: Vec::new(),
            aggregator: Aggregator::new(),
            timeout: DEFAULT_TIMEOUT,
            limiter,
            audit: None,
        }
    }

    /// Adds a provider.
    pub fn add_provider<P: Provider + 'static>(&mut self, provider: P) {
        self.providers.push(Arc::new(provider));
    }

    /// Sets the per-provider timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sets the number of results kept after ranking.
    pub fn set_max_results(&mut self, max_results: usize) {
        self.aggregator = self.aggregator.clone().with_max_results(max_results);
    }

    /// Enables or disables deduplication.
    pub fn set_deduplicate(&mut self, deduplicate: bool) {
        self.aggregator = self.aggregator.clone().with_deduplicate(deduplicate);
    }

    /// Attaches an audit log that receives one event per search.
    pub fn set_audit_log(&mut self, audit: AuditLog) {
        self.audit = Some(audit);
    }

    /// Returns the number of configured providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns the per-provider timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the attached audit log, if any.
    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Returns the limiter provider calls are admitted through.
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Performs a search across all enabled providers.
    pub async fn search(&self, query: SearchQuery) -> Result<AggregatedResponse> {
        let providers: Vec<Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|provider| provider.is_enabled())
            .cloned()
            .collect();
        if providers.is_empty() {
            return Err(SearchError::NoProviders);
        }
        query.validate()?;

        let start = Instant::now();
        let query = Arc::new(query);
        debug!("Searching {} providers", providers.len());

        let mut tasks = JoinSet::new();
        for (index, provider) in providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let query = Arc::clone(&query);
            let limiter = self.limiter.clone();
            let budget = self.timeout;
            tasks.spawn(async move {
                let outcome = call_provider(&limiter, provider.as_ref(), &query, budget).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Outcome> = providers
            .iter()
            .map(|_| Outcome::Failed(SearchError::Other("provider task did not finish".into())))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(e) => warn!("Provider task aborted: {}", e),
            }
        }

        let mut pool = Vec::new();
        let mut queried_providers = Vec::with_capacity(providers.len());
        let mut failed_providers = Vec::new();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            let name = provider.name().to_string();
            match outcome {
                Outcome::Results(results) => pool.extend(results),
                Outcome::Failed(e @ SearchError::Shutdown { .. }) => return Err(e),
                Outcome::Failed(_) => failed_providers.push(name.clone()),
            }
            queried_providers.push(name);
        }

        if !failed_providers.is_empty() {
            warn!(
                "{} of {} providers failed: {}",
                failed_providers.len(),
                queried_providers.len(),
                failed_providers.join(", ")
            );
        }

        let results = self.aggregator.aggregate(pool);
        let response = AggregatedResponse {
            query: query.query.clone(),
            total_results: results.len(),
            results,
            queried_providers,
            failed_providers,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::new(
                "search_completed",
                json!({
                    "query": response.query,
                    "total_results": response.total_results,
                    "queried_providers": response.queried_providers,
                    "failed_providers": response.failed_providers,
                    "duration_ms": response.duration_ms,
                }),
            ));
        }

        Ok(response)
    }

    /// Probes every provider concurrently for health reporting.
    ///
    /// Disabled providers are reported unavailable without a probe.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let probes = self.providers.iter().map(|provider| async move {
            let available = provider.is_enabled() && provider.is_available().await;
            ProviderStatus {
                name: provider.name().to_string(),
                available,
            }
        });
        join_all(probes).await
    }
}

impl std::fmt::Debug for Search {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("Search")
            .field("providers", &providers)
            .field("aggregator", &self.aggregator)
            .field("timeout", &self.timeout)
            .field("limiter", &self.limiter)
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

/// Runs one admitted provider call within `budget`.
///
/// The call runs on its own task; on timeout the provider future is dropped,
/// which discards any late result and frees its limiter slot.
async fn call_provider(
    limiter: &Limiter,
    provider: &dyn Provider,
    query: &SearchQuery,
    budget: Duration,
) -> Outcome {
    let name = provider.name();
    match timeout(budget, limiter.schedule_keyed(name, provider.search(query))).await {
        Ok(Ok(results)) => {
            debug!("Provider {} returned {} results", name, results.len());
            Outcome::Results(results)
        }
        Ok(Err(e)) => {
            warn!("Provider {} failed: {}", name, e);
            Outcome::Failed(e)
        }
        Err(_) => {
            warn!("Provider {} timed out after {}ms", name, budget.as_millis());
            Outcome::Failed(SearchError::Timeout {
                provider: name.to_string(),
                timeout_ms: budget.as_millis() as u64,
            })
        }
    }
}

impl Default for Search {
    fn default() -> Self {
        Self::new(Limiter::new(limiter::SEARCH, LimiterConfig::search()))
    }
}
