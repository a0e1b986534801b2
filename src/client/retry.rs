//! Retry configuration, backoff calculation, and the shared retry loop.
//!
//! [`should_retry`] is the single classification point: every transport
//! failure passes through it, and nothing else decides whether a call is
//! repeated. [`with_retry`] drives attempts sequentially and sleeps between
//! them without holding any lock, so dropping or aborting the caller
//! interrupts the backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::telemetry;
use crate::{MuninnError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use muninn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 2s.
    pub base_delay: Duration,
    /// Cap on exponential growth. Default: 60s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before attempt `attempt` (0-indexed, so the first retry is 1).
    ///
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`. Attempt 0
    /// never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff, unless the upstream sent a `Retry-After` hint.
    ///
    /// The hint is capped at `max_delay` like the computed backoff.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_before(attempt))
    }
}

/// Whether a failed attempt `attempt` (0-indexed) should be followed by
/// another one.
///
/// The attempt budget is checked first; after that the decision depends
/// only on the error's [`ErrorKind`]. Unclassified internal failures are
/// retried, malformed requests and responses never are.
pub fn should_retry(error: &MuninnError, attempt: u32, max_attempts: u32) -> bool {
    if attempt.saturating_add(1) >= max_attempts {
        return false;
    }
    match error.kind() {
        ErrorKind::Transient | ErrorKind::Internal => true,
        ErrorKind::InputValidation
        | ErrorKind::Upstream
        | ErrorKind::NotStarted
        | ErrorKind::Cancelled
        | ErrorKind::Configuration => false,
    }
}

/// Run `f` until it succeeds, fails permanently, or the budget runs out.
///
/// `f` receives the 0-indexed attempt number. On exhaustion the last
/// observed error is returned. A zero budget yields
/// [`MuninnError::Internal`] rather than hanging the caller.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, model: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = config.effective_delay(
                attempt,
                last_err.as_ref().and_then(MuninnError::retry_after),
            );
            tokio::time::sleep(delay).await;
        }

        match f(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(model, attempt = attempt + 1, "recovered after retry");
                }
                return Ok(value);
            }
            Err(e) if should_retry(&e, attempt, config.max_attempts) => {
                metrics::counter!(telemetry::RETRIES_TOTAL, "model" => model.to_owned())
                    .increment(1);
                let next = config.effective_delay(attempt + 1, e.retry_after());
                warn!(
                    model,
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    delay_ms = u64::try_from(next.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "retrying after transient error"
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| MuninnError::Internal("no attempt was made".into())))
}
