//! Shared failure-recovery helpers.
//!
//! Two patterns, used by several components:
//! - [`first_success`]: ordered fallible strategies, short-circuit on the
//!   first that yields a value (credential chain, extract→scrape chain).
//! - [`retry_rate_limited`]: bounded retry loop that only re-attempts on
//!   rate-limit signals, honoring a server-provided wait hint when present
//!   and exponential backoff otherwise (AI call, task creation call).

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::{BACKOFF_BASE, BACKOFF_CAP, MAX_ATTEMPTS};
use crate::error::{AnalysisError, ApiError};

// ── Ordered strategy chain ──────────────────────────────────────────

/// Run labeled strategies in order; the first one producing `Some` wins
/// and later strategies are not attempted.
///
/// Strategy errors must already be absorbed into `None` by the caller —
/// a failed source is "not found", not fatal.
pub async fn first_success<T>(
    what: &str,
    strategies: Vec<(&'static str, BoxFuture<'_, Option<T>>)>,
) -> Option<(&'static str, T)> {
    for (label, fut) in strategies {
        match fut.await {
            Some(value) => {
                debug!(what, source = label, "strategy chain satisfied");
                return Some((label, value));
            }
            None => debug!(what, source = label, "strategy yielded nothing, trying next"),
        }
    }
    None
}

// ── Rate-limit retry ────────────────────────────────────────────────

/// Errors that may carry a rate-limit signal.
pub trait RateLimitSignal {
    /// `Some(hint)` when this error is a retryable rate limit;
    /// the inner value is the server-provided wait, if any.
    fn rate_limit_hint(&self) -> Option<Option<Duration>>;
}

impl RateLimitSignal for AnalysisError {
    fn rate_limit_hint(&self) -> Option<Option<Duration>> {
        match self {
            AnalysisError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl RateLimitSignal for ApiError {
    fn rate_limit_hint(&self) -> Option<Option<Duration>> {
        match self {
            ApiError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Backoff tuning for rate-limited calls.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay when no server hint is available.
    pub base: Duration,
    /// Upper bound on any single wait.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base: BACKOFF_BASE,
            cap: BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    /// Wait before the attempt following failed attempt `attempt` (1-based).
    ///
    /// A server hint always wins; otherwise the base doubles each attempt,
    /// capped, with a small additive jitter so concurrent runs desynchronize.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let exp = self.base.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
        exp.min(self.cap) + jitter
    }
}

/// Call `op` up to `policy.max_attempts` times, sleeping between attempts
/// only when the error is a rate-limit signal. Any other error returns
/// immediately; exhausting attempts returns the last rate-limit error.
pub async fn retry_rate_limited<T, E, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: RateLimitSignal + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match err.rate_limit_hint() {
                Some(hint) if attempt < policy.max_attempts => {
                    let wait = policy.delay(attempt, hint);
                    warn!(
                        what,
                        attempt,
                        max = policy.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                _ => return Err(err),
            },
        }
    }
}
