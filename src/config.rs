//! Top-level configuration and wiring.
//!
//! [`PlazaConfig`] describes which providers are used, how results are
//! aggregated and how each limiter domain admits work. It assembles the
//! limiter registry and the aggregation engine explicitly; nothing here is
//! global.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::AuditLog;
use crate::limiter::{self, LimiterConfig, Limiters};
use crate::providers::{Exa, Perplexity, Serper};
use crate::{ProviderConfig, Result, Search, SearchError};

/// Environment variable holding the Exa API key.
pub const EXA_API_KEY: &str = "EXA_API_KEY";
/// Environment variable holding the Serper API key.
pub const SERPER_API_KEY: &str = "SERPER_API_KEY";
/// Environment variable holding the Perplexity API key.
pub const PERPLEXITY_API_KEY: &str = "PERPLEXITY_API_KEY";

/// Configuration for the whole search system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlazaConfig {
    #[serde(default)]
    pub exa: Option<ProviderConfig>,
    #[serde(default)]
    pub serper: Option<ProviderConfig>,
    #[serde(default)]
    pub perplexity: Option<ProviderConfig>,
    /// Results kept after ranking.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Whether duplicate URLs are merged.
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,
    /// Per-provider timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Admission rules keyed by domain name.
    #[serde(default = "default_limiters")]
    pub limiters: HashMap<String, LimiterConfig>,
    /// Emit a `search_completed` audit event through tracing per search.
    #[serde(default)]
    pub audit: bool,
}

fn default_max_results() -> usize {
    10
}

fn default_deduplicate() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_limiters() -> HashMap<String, LimiterConfig> {
    HashMap::from([
        (limiter::SCRAPE.to_string(), LimiterConfig::scrape()),
        (limiter::BROWSE.to_string(), LimiterConfig::browse()),
        (limiter::SEARCH.to_string(), LimiterConfig::search()),
    ])
}

impl Default for PlazaConfig {
    fn default() -> Self {
        Self {
            exa: None,
            serper: None,
            perplexity: None,
            max_results: default_max_results(),
            deduplicate: default_deduplicate(),
            timeout_ms: default_timeout_ms(),
            limiters: default_limiters(),
            audit: false,
        }
    }
}

impl PlazaConfig {
    /// Reads provider keys from `EXA_API_KEY`, `SERPER_API_KEY` and
    /// `PERPLEXITY_API_KEY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// A provider is configured only when its key is present and non-blank.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = |var: &str, name: &str| {
            lookup(var)
                .filter(|key| !key.trim().is_empty())
                .map(|key| ProviderConfig::new(name, key))
        };
        Self {
            exa: provider(EXA_API_KEY, Exa::NAME),
            serper: provider(SERPER_API_KEY, Serper::NAME),
            perplexity: provider(PERPLEXITY_API_KEY, Perplexity::NAME),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Per-provider timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Names of the providers that will be queried.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if usable(&self.exa) {
            names.push(Exa::NAME);
        }
        if usable(&self.serper) {
            names.push(Serper::NAME);
        }
        if usable(&self.perplexity) {
            names.push(Perplexity::NAME);
        }
        names
    }

    /// Validates this configuration.
    ///
    /// Checks:
    /// - `max_results` must be greater than 0
    /// - `timeout_ms` must be greater than 0
    /// - every limiter must admit at least one task and have a usable reservoir
    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(SearchError::Config(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(SearchError::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        for (domain, config) in &self.limiters {
            config.validate().map_err(|e| match e {
                SearchError::Config(msg) => SearchError::Config(format!("limiter '{}': {}", domain, msg)),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Creates one limiter per configured domain.
    ///
    /// The `search` domain is always present; it falls back to
    /// [`LimiterConfig::search`] when not configured.
    pub fn build_limiters(&self) -> Result<Limiters> {
        self.validate()?;
        let mut limiters = Limiters::new();
        for (domain, config) in &self.limiters {
            limiters.insert(domain.clone(), *config);
        }
        if limiters.get(limiter::SEARCH).is_none() {
            limiters.insert(limiter::SEARCH, LimiterConfig::search());
        }
        Ok(limiters)
    }

    /// Assembles the aggregation engine over every usable provider.
    ///
    /// Provider calls are admitted through the `search` limiter of
    /// `limiters`. With `audit` set, a [`AuditLog::tracing`] log is attached,
    /// which must happen inside a Tokio runtime.
    pub fn build_search(&self, limiters: &Limiters) -> Result<Search> {
        self.validate()?;
        let mut search = Search::new(limiters.require(limiter::SEARCH)?.clone());
        search.set_timeout(self.timeout());
        search.set_max_results(self.max_results);
        search.set_deduplicate(self.deduplicate);
        if self.audit {
            search.set_audit_log(AuditLog::tracing());
        }

        if let Some(config) = usable_config(&self.exa, Exa::NAME) {
            search.add_provider(Exa::with_config(config)?);
        }
        if let Some(config) = usable_config(&self.serper, Serper::NAME) {
            search.add_provider(Serper::with_config(config)?);
        }
        if let Some(config) = usable_config(&self.perplexity, Perplexity::NAME) {
            search.add_provider(Perplexity::with_config(config)?);
        }

        debug!("Configured {} providers", search.provider_count());
        Ok(search)
    }
}

fn usable(config: &Option<ProviderConfig>) -> bool {
    config.as_ref().is_some_and(ProviderConfig::is_usable)
}

fn usable_config(config: &Option<ProviderConfig>, name: &str) -> Option<ProviderConfig> {
    let mut config = config.clone().filter(ProviderConfig::is_usable)?;
    if config.name.is_empty() {
        config.name = name.to_string();
    }
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReservoirConfig;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PlazaConfig::default();
        assert_eq!(config.max_results, 10);
        assert!(config.deduplicate);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.limiters.len(), 3);
        assert_eq!(config.limiters["search"], LimiterConfig::search());
        assert!(config.enabled_providers().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = PlazaConfig::from_lookup(lookup(&[
            (EXA_API_KEY, "exa-key"),
            (SERPER_API_KEY, "  "),
            (PERPLEXITY_API_KEY, "pplx-key"),
        ]));
        assert_eq!(config.exa.as_ref().map(|c| c.name.as_str()), Some("exa"));
        assert!(config.serper.is_none());
        assert_eq!(config.enabled_providers(), vec!["exa", "perplexity"]);
    }

    #[test]
    fn test_from_json() {
        let config = PlazaConfig::from_json(
            r#"{
                "serper": {"api_key": "k"},
                "exa": {"api_key": "k", "enabled": false},
                "max_results": 5,
                "limiters": {"search": {"max_concurrent": 2, "min_spacing_ms": 0}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_results, 5);
        assert!(config.deduplicate);
        assert_eq!(config.enabled_providers(), vec!["serper"]);
        assert_eq!(config.limiters.len(), 1);
        assert_eq!(config.limiters["search"].max_concurrent, 2);
        assert!(config.limiters["search"].reservoir.is_none());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = PlazaConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = PlazaConfig {
            max_results: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));

        let config = PlazaConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_limiter() {
        let mut config = PlazaConfig::default();
        config.limiters.insert(
            "scrape".to_string(),
            LimiterConfig::new(0, Duration::ZERO),
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limiter 'scrape'"));

        let mut config = PlazaConfig::default();
        config.limiters.insert(
            "search".to_string(),
            LimiterConfig::new(1, Duration::ZERO)
                .with_reservoir(ReservoirConfig::new(0, Duration::from_secs(1))),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_limiters_always_has_search() {
        let config = PlazaConfig {
            limiters: HashMap::from([("scrape".to_string(), LimiterConfig::scrape())]),
            ..Default::default()
        };
        let limiters = config.build_limiters().unwrap();
        let mut domains: Vec<_> = limiters.domains().collect();
        domains.sort();
        assert_eq!(domains, vec!["scrape", "search"]);
        assert_eq!(
            limiters.get("search").map(|l| *l.config()),
            Some(LimiterConfig::search())
        );
    }

    #[test]
    fn test_build_search() {
        let config = PlazaConfig {
            max_results: 7,
            timeout_ms: 2_000,
            ..PlazaConfig::from_lookup(lookup(&[
                (EXA_API_KEY, "a"),
                (SERPER_API_KEY, "b"),
            ]))
        };
        let limiters = config.build_limiters().unwrap();
        let search = config.build_search(&limiters).unwrap();
        assert_eq!(search.provider_count(), 2);
        assert_eq!(search.timeout(), Duration::from_secs(2));
        assert_eq!(search.limiter().domain(), "search");
        assert!(search.audit_log().is_none());
    }

    #[tokio::test]
    async fn test_build_search_attaches_audit_log() {
        let config = PlazaConfig {
            audit: true,
            ..PlazaConfig::from_lookup(lookup(&[(SERPER_API_KEY, "b")]))
        };
        let limiters = config.build_limiters().unwrap();
        let search = config.build_search(&limiters).unwrap();
        assert!(search.audit_log().is_some());
    }

    #[test]
    fn test_build_search_requires_search_limiter() {
        let config = PlazaConfig::default();
        let err = config.build_search(&Limiters::new()).unwrap_err();
        assert!(matches!(err, SearchError::UnknownDomain(_)));
    }
}
