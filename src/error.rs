//! Error types for the search library.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search and scheduling operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed input.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Provider rejected the configured credentials.
    #[error("Provider '{provider}' rejected credentials (HTTP {status})")]
    Authentication { provider: String, status: u16 },

    /// HTTP transport failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("Provider '{provider}' returned HTTP {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    /// Failed to parse a provider response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Provider did not answer within its time budget.
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// No providers configured.
    #[error("No search providers configured")]
    NoProviders,

    /// Every attempt failed; carries the last underlying error.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<SearchError>,
    },

    /// Task dropped because its limiter was stopped.
    #[error("Limiter '{domain}' has been stopped")]
    Shutdown { domain: String },

    /// No limiter registered under the given domain.
    #[error("Unknown limiter domain: {0}")]
    UnknownDomain(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Whether another attempt of the same operation may succeed.
    ///
    /// Errors are retryable unless they are known to be fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Api { retryable, .. } => *retryable,
            SearchError::Validation(_)
            | SearchError::Authentication { .. }
            | SearchError::NoProviders
            | SearchError::RetryExhausted { .. }
            | SearchError::Shutdown { .. }
            | SearchError::UnknownDomain(_)
            | SearchError::Config(_) => false,
            SearchError::Http(_)
            | SearchError::Parse(_)
            | SearchError::Timeout { .. }
            | SearchError::Other(_) => true,
        }
    }

    /// HTTP-equivalent status for collaborators that build response envelopes.
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::Validation(_) => 400,
            SearchError::Authentication { status, .. } => *status,
            SearchError::NoProviders | SearchError::Shutdown { .. } => 503,
            SearchError::Timeout { .. } => 504,
            SearchError::RetryExhausted { last, .. } => last.status_code(),
            _ => 500,
        }
    }

    /// Returns the innermost error, unwrapping retry exhaustion.
    pub fn root_cause(&self) -> &SearchError {
        match self {
            SearchError::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
