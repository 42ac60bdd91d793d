//! Result deduplication and ranking.

use std::collections::{HashMap, HashSet};

use url::Url;

use crate::SearchResult;

/// Query parameters that only track the visitor and never change the page.
pub const TRACKING_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "ref", "fbclid"];

/// Score multiplier applied each time another provider returns the same URL.
pub const CORROBORATION_BOOST: f64 = 1.1;

/// Default number of results kept after ranking.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Canonical identity of a result URL.
///
/// Strips [`TRACKING_PARAMS`] and lower-cases the serialized URL. Input
/// that does not parse as a URL is simply lower-cased.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_lowercase();
    };

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    parsed.as_str().to_lowercase()
}

/// Merges, ranks and truncates results from multiple providers.
#[derive(Debug, Clone)]
pub struct Aggregator {
    deduplicate: bool,
    max_results: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            deduplicate: true,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl Aggregator {
    /// Creates a new aggregator with deduplication on and a cap of 10.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables deduplication.
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Sets the number of results kept after ranking.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Returns the result cap.
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Returns whether deduplication is enabled.
    pub fn deduplicates(&self) -> bool {
        self.deduplicate
    }

    /// Aggregates a pool of results in arrival order.
    ///
    /// This performs:
    /// 1. Deduplication by [`normalize_url`], boosting the kept entry
    /// 2. Stable sort by descending score, with NaN scores ranked last
    /// 3. Truncation to the configured cap
    ///
    /// Ids that collide across providers get a numeric suffix so that every
    /// returned id is unique.
    pub fn aggregate(&self, pool: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut results = if self.deduplicate {
            self.deduplicate_results(pool)
        } else {
            pool
        };

        results.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
        results.truncate(self.max_results);
        ensure_unique_ids(&mut results);
        results
    }

    /// Keeps the first result per normalized URL.
    ///
    /// Every later duplicate is dropped and folds its score into the kept
    /// entry as `max(kept, duplicate) * 1.1`, compounding per duplicate.
    fn deduplicate_results(&self, pool: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<SearchResult> = Vec::with_capacity(pool.len());

        for result in pool {
            let key = normalize_url(&result.url);
            match index_by_key.get(&key) {
                Some(&index) => {
                    let canonical = &mut kept[index];
                    canonical.score = canonical.score.max(result.score) * CORROBORATION_BOOST;
                }
                None => {
                    index_by_key.insert(key, kept.len());
                    kept.push(result);
                }
            }
        }

        kept
    }
}

fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

fn ensure_unique_ids(results: &mut [SearchResult]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(results.len());
    for result in results.iter_mut() {
        if seen.contains(&result.id) {
            let mut n = 2;
            while seen.contains(&format!("{}_{}", result.id, n)) {
                n += 1;
            }
            result.id = format!("{}_{}", result.id, n);
        }
        seen.insert(result.id.clone());
    }
}
