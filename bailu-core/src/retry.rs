//! Retry and Error Recovery
//!
//! Exponential backoff with jitter around LLM transport calls. Only
//! transient failures are retried: network errors, HTTP 429, and 5xx.
//! Everything else propagates immediately.

use std::time::Duration;

use anyhow::Result;
use tracing::warn;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (default 3).
    pub max_retries: u32,
    /// Base delay in milliseconds (default 1000).
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default 30000).
    pub max_delay_ms: u64,
    /// Backoff multiplier (default 2.0).
    pub backoff_multiplier: f64,
    /// Jitter fraction applied around each delay (default 0.25 → ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay for a given attempt (0-indexed), jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = delay_ms.min(self.max_delay_ms as f64);
        let spread = 1.0 + self.jitter * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_millis((clamped * spread).max(0.0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Retryable error classification
// ---------------------------------------------------------------------------

/// Whether an error is transient and should be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429 — rate limit. May include a Retry-After hint.
    RateLimit { retry_after: Option<Duration> },
    /// HTTP 5xx — server errors.
    ServerError,
    /// Network timeout or connection reset.
    NetworkError,
    /// Non-retryable error (4xx other than 429, auth failure, etc.).
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

/// Classify an error from an HTTP status code.
pub fn classify_http_error(status: u16, retry_after_header: Option<&str>) -> ErrorKind {
    match status {
        429 => {
            let retry_after =
                retry_after_header.and_then(|h| h.parse::<u64>().ok().map(Duration::from_secs));
            ErrorKind::RateLimit { retry_after }
        }
        s if s >= 500 => ErrorKind::ServerError,
        _ => ErrorKind::Fatal,
    }
}

// ---------------------------------------------------------------------------
// Retry executor
// ---------------------------------------------------------------------------

/// Execute an async operation with backoff, retrying only errors whose
/// classification is transient. A `Retry-After` hint from a rate limit
/// takes precedence over the computed delay.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    classify: impl Fn(&E) -> ErrorKind,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Into<anyhow::Error>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let kind = classify(&err);
                if !kind.is_retryable() {
                    return Err(err.into());
                }
                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "max retries exceeded"
                    );
                    return Err(err.into());
                }

                let delay = match &kind {
                    ErrorKind::RateLimit {
                        retry_after: Some(hint),
                    } => *hint,
                    _ => policy.delay_for_attempt(attempt),
                };
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "retrying after transient error"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_backoff_stays_within_jitter_band() {
        let policy = RetryPolicy::default();
        for (attempt, base) in [(0u32, 1000.0f64), (1, 2000.0), (2, 4000.0)] {
            let d = policy.delay_for_attempt(attempt).as_millis() as f64;
            assert!(d >= base * 0.75 - 1.0, "attempt {}: {} too low", attempt, d);
            assert!(d <= base * 1.25 + 1.0, "attempt {}: {} too high", attempt, d);
        }
    }

    #[test]
    fn delay_clamped_to_max() {
        let policy = RetryPolicy {
            base_delay_ms: 10000,
            max_delay_ms: 30000,
            jitter: 0.0,
            ..Default::default()
        };
        // 10000 * 2^2 = 40000 → clamped to 30000
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(30000));
    }

    #[test]
    fn classify_statuses() {
        assert_eq!(
            classify_http_error(429, Some("5")),
            ErrorKind::RateLimit {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(classify_http_error(500, None), ErrorKind::ServerError);
        assert_eq!(classify_http_error(503, None), ErrorKind::ServerError);
        assert_eq!(classify_http_error(401, None), ErrorKind::Fatal);
        assert_eq!(classify_http_error(404, None), ErrorKind::Fatal);
        assert_eq!(classify_http_error(400, None), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let call_count = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            base_delay_ms: 5,
            max_delay_ms: 20,
            ..Default::default()
        };

        let counter = call_count.clone();
        let result = with_retry(
            &policy,
            "test",
            |_| ErrorKind::NetworkError,
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<i32> = with_retry(
            &RetryPolicy::default(),
            "test",
            |_| ErrorKind::Fatal,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(anyhow::anyhow!("401 unauthorized"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhausted_returns_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 10,
            ..Default::default()
        };
        let result: Result<i32> = with_retry(
            &policy,
            "test",
            |_| ErrorKind::ServerError,
            || async { Err::<i32, _>(anyhow::anyhow!("always 503")) },
        )
        .await;
        assert!(result.is_err());
    }
}
