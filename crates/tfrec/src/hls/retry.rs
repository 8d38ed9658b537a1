// Bounded retry shared by segment, key and artwork downloads: a fixed number
// of attempts separated by a fixed pause.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::PipelineError;
use crate::config::FetcherConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl From<&FetcherConfig> for RetryPolicy {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay,
        }
    }
}

/// Result of a single attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure, try again if attempts remain.
    Retry(PipelineError),
    /// Deterministic failure, stop now.
    Fail(PipelineError),
}

impl<T> From<Result<T, PipelineError>> for RetryAction<T> {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => RetryAction::Success(value),
            Err(err) if err.is_retryable() => RetryAction::Retry(err),
            Err(err) => RetryAction::Fail(err),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
///
/// `operation` receives the 1-based attempt number. Running out of attempts
/// yields [`PipelineError::FetchExhausted`] naming `url`.
pub async fn retry_with_delay<F, Fut, T>(
    policy: &RetryPolicy,
    url: &str,
    operation: F,
) -> Result<T, PipelineError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut last_error = String::from("no attempt was made");

    for attempt in 1..=policy.max_attempts {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => {
                error!(url, attempt, error = %err, "Download failed permanently");
                return Err(err);
            }
            RetryAction::Retry(err) => {
                last_error = err.to_string();
                if attempt >= policy.max_attempts {
                    error!(url, attempt, max = policy.max_attempts, error = %err, "Download failed");
                    break;
                }
                warn!(
                    url,
                    attempt,
                    max = policy.max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Download retry"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }

    Err(PipelineError::FetchExhausted {
        url: url.to_string(),
        attempts: policy.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn server_error() -> PipelineError {
        PipelineError::http_status("https://cdn/seg.aac", StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result =
            retry_with_delay(&policy(3), "u", |_| async { RetryAction::Success(42u32) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_delay(&policy(3), "https://cdn/seg.aac", |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Retry(server_error()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        match result {
            Err(PipelineError::FetchExhausted { url, attempts, last_error }) => {
                assert_eq!(url, "https://cdn/seg.aac");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_delay(&policy(3), "u", |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Fail(PipelineError::decryption("bad padding")) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert!(matches!(result, Err(PipelineError::Decryption { .. })));
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let result = retry_with_delay(&policy(3), "u", |attempt| async move {
            if attempt == 1 {
                RetryAction::Retry(server_error())
            } else {
                RetryAction::Success(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn classification_follows_error_kind() {
        let retry: RetryAction<()> = Err(server_error()).into();
        assert!(matches!(retry, RetryAction::Retry(_)));

        let fail: RetryAction<()> = Err(PipelineError::decryption("x")).into();
        assert!(matches!(fail, RetryAction::Fail(_)));
    }
}
