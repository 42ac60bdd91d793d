//! Search query representation.

use serde::{Deserialize, Serialize};

use crate::{Result, SearchError};

/// Default number of results requested from each provider.
pub const DEFAULT_LIMIT: u32 = 10;

/// Time range filter for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    /// Single-letter code used by Google-style `qdr:` filters.
    pub fn code(self) -> char {
        match self {
            TimeRange::Day => 'd',
            TimeRange::Week => 'w',
            TimeRange::Month => 'm',
            TimeRange::Year => 'y',
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "d" | "day" => Ok(TimeRange::Day),
            "w" | "week" => Ok(TimeRange::Week),
            "m" | "month" => Ok(TimeRange::Month),
            "y" | "year" => Ok(TimeRange::Year),
            other => Err(SearchError::Validation(format!(
                "unknown time range '{}'",
                other
            ))),
        }
    }
}

/// A search query with all parameters.
///
/// Queries are built once per request and shared read-only between
/// every provider call of one aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The search terms.
    pub query: String,
    /// Number of results to request from each provider.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Pagination offset.
    #[serde(default)]
    pub offset: u32,
    /// Language/locale (e.g., "en").
    #[serde(default)]
    pub language: Option<String>,
    /// Time range filter.
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Restrict results to one site.
    #[serde(default)]
    pub site: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl SearchQuery {
    /// Creates a new search query with the given terms.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            language: None,
            time_range: None,
            site: None,
        }
    }

    /// Sets the per-provider result limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the pagination offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the language/locale.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Sets the time range filter.
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Restricts the search to a single site.
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// Checks that the query can be sent to providers.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(SearchError::Validation("query cannot be empty".into()));
        }
        if self.limit == 0 {
            return Err(SearchError::Validation("limit must be at least 1".into()));
        }
        Ok(())
    }

    /// One-based page number derived from offset and limit.
    pub fn page(&self) -> u32 {
        if self.offset == 0 || self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }
}
