//! Retry with exponential backoff.
//!
//! [`retry`] re-runs a fallible async operation until it succeeds, fails
//! with a non-retryable error, or runs out of attempts. It holds no shared
//! state, so it composes freely with [`Limiter`](crate::Limiter): schedule
//! the whole retry loop as one limiter task and it occupies a single slot
//! for its entire duration.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Result, SearchError};

/// Backoff parameters for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor applied per further attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy used by provider adapters: two attempts, one second apart.
    pub fn provider_default() -> Self {
        Self {
            max_attempts: 2,
            ..Self::default()
        }
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets or clears the delay cap.
    pub fn with_max_delay(mut self, delay: Option<Duration>) -> Self {
        self.max_delay_ms = delay.map(|d| d.as_millis() as u64);
        self
    }

    /// Delay to wait before `attempt` (1-based). The first attempt runs immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = match self.max_delay_ms {
            Some(cap) => raw.min(cap as f64),
            None => raw,
        };
        Duration::from_millis(capped.min(u64::MAX as f64) as u64)
    }
}

/// Runs `operation` under `policy`.
///
/// Non-retryable errors are returned as-is on the attempt that produced
/// them. When every attempt fails with a retryable error the last one is
/// wrapped in [`SearchError::RetryExhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!("Attempt {} failed with non-retryable error: {}", attempt, e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, e);
                return Err(SearchError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                debug!(
                    "Attempt {} of {} failed: {}; retrying in {:?}",
                    attempt - 1,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
