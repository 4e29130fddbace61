//! Bounded exponential backoff for calls to external services.
//!
//! Callers classify each failure as transient (network error, timeout,
//! HTTP 429 or 5xx) or permanent (other 4xx, unparseable payload, not
//! found). Transient failures are retried with delays of `base`, `2×base`,
//! `4×base`, … capped at [`MAX_DELAY`]; permanent failures stop immediately.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Upper bound on a single backoff sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay.saturating_mul(1 << exp).min(MAX_DELAY)
    }
}

/// A failed call, tagged with whether retrying could help.
#[derive(Debug)]
pub enum CallError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl CallError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        CallError::Transient(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        CallError::Permanent(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            CallError::Transient(e) | CallError::Permanent(e) => e,
        }
    }

    /// Classify a non-success HTTP status from `service`.
    pub fn from_status(service: &str, status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        let err = anyhow::anyhow!("{} returned {}: {}", service, status, snippet.trim());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            CallError::Transient(err)
        } else {
            CallError::Permanent(err)
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Transient(e) => write!(f, "{:#}", e),
            CallError::Permanent(e) => write!(f, "{:#}", e),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return CallError::Transient(err.into());
        }
        match err.status() {
            Some(status) if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                CallError::Transient(err.into())
            }
            _ => CallError::Permanent(err.into()),
        }
    }
}

/// The final failure of a retried operation.
#[derive(Debug, Error)]
#[error("{what} failed after {attempts} attempt(s): {error:#}")]
pub struct RetryError {
    pub what: String,
    pub attempts: u32,
    /// False when a permanent failure stopped the loop early.
    pub exhausted: bool,
    pub error: anyhow::Error,
}

impl RetryError {
    pub fn cause(&self) -> String {
        format!("{:#}", self.error)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy's attempt
/// budget is spent. `op` receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(CallError::Permanent(error)) => {
                return Err(RetryError {
                    what: what.to_string(),
                    attempts: attempt,
                    exhausted: false,
                    error,
                });
            }
            Err(CallError::Transient(error)) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError {
                        what: what.to_string(),
                        attempts: attempt,
                        exhausted: true,
                        error,
                    });
                }
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{:#}", error),
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(9), MAX_DELAY);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn status_classification() {
        assert!(CallError::from_status("x", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(CallError::from_status("x", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!CallError::from_status("x", StatusCode::NOT_FOUND, "").is_transient());
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast(3), "flaky", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(CallError::transient(anyhow::anyhow!("503")))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let err = retry(&fast(3), "down", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CallError::transient(anyhow::anyhow!("connection refused"))) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert!(err.exhausted);
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry(&fast(3), "missing", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CallError::permanent(anyhow::anyhow!("404"))) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.exhausted);
    }
}
