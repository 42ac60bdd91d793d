//! # plaza-search
//!
//! Multi-provider search aggregation with shared outbound rate limiting.
//!
//! This library fans a query out to several search APIs and merges their
//! answers into one ranked response, with support for:
//!
//! - Parallel provider calls with per-provider timeouts
//! - Partial-failure tolerance reported as failed providers
//! - URL-normalized deduplication with score reconciliation
//! - Per-domain concurrency limiting with optional quotas
//! - Exponential backoff retries
//!
//! ## Example
//!
//! ```rust,no_run
//! use plaza_search::{PlazaConfig, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PlazaConfig::from_env();
//!     let limiters = config.build_limiters()?;
//!     let search = config.build_search(&limiters)?;
//!
//!     let response = search.search(SearchQuery::new("rust async runtimes")).await?;
//!     for result in response.items() {
//!         println!("{}: {}", result.title, result.url);
//!     }
//!     Ok(())
//! }
//! ```

mod aggregator;
mod config;
mod error;
mod query;
mod result;
mod search;

pub mod audit;
pub mod limiter;
pub mod provider;
pub mod providers;
pub mod retry;

pub use aggregator::{normalize_url, Aggregator};
pub use audit::{AuditEvent, AuditLog, AuditSink, TracingSink};
pub use config::PlazaConfig;
pub use error::{Result, SearchError};
pub use limiter::{Limiter, LimiterConfig, Limiters, ReservoirConfig};
pub use provider::{Provider, ProviderConfig};
pub use query::{SearchQuery, TimeRange};
pub use result::{extract_domain, AggregatedResponse, ProviderStatus, SearchResult};
pub use retry::{retry, RetryPolicy};
pub use search::Search;
