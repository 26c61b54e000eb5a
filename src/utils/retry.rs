//! Retry utilities with linear backoff for artifact downloads.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Clock;
use crate::sources::SourceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// A value produced by a retried operation, with the attempt that produced it
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error of a retried operation and how many attempts were made
#[derive(Debug)]
pub struct RetryFailure {
    pub error: SourceError,
    pub attempts: u32,
}

/// Execute an async operation, retrying transient failures
///
/// The operation receives the 1-based attempt number. Only errors for which
/// [`SourceError::is_transient`] holds are retried; anything else is returned
/// straight away. Backoff waits go through `clock` and stop early when
/// `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    config: RetryConfig,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Retried<T>, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempt,
                        attempt - 1
                    );
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(RetryFailure {
                error,
                attempts: attempt,
            });
        }

        if attempt >= max_attempts {
            tracing::warn!("Operation failed after {} attempts: {}", attempt, error);
            return Err(RetryFailure {
                error,
                attempts: attempt,
            });
        }

        let delay = config.delay_for(attempt);
        tracing::debug!(
            "Transient error on attempt {}/{}: {}, retrying in {:?}",
            attempt,
            max_attempts,
            error,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryFailure {
                    error: SourceError::Cancelled,
                    attempts: attempt,
                });
            }
            _ = clock.sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> RetryConfig {
        RetryConfig::new(3, Duration::from_secs(5))
    }

    #[test]
    fn test_linear_backoff() {
        let config = config();
        assert_eq!(config.delay_for(1), Duration::from_secs(5));
        assert_eq!(config.delay_for(2), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result = with_retry(config(), &clock, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("success") }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "success");
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let clock = ManualClock::new();

        let result = with_retry(config(), &clock, &CancellationToken::new(), |attempt| async move {
            if attempt < 3 {
                Err(SourceError::Timeout("slow".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let clock = ManualClock::new();

        let failure = with_retry(config(), &clock, &CancellationToken::new(), |_| async {
            Err::<(), _>(SourceError::Fetch("HTTP 503".to_string()))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, SourceError::Fetch(_)));
        // No wait after the final attempt
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_returns_permanent_error() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let failure = with_retry(config(), &clock, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, SourceError::Io(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_stops_on_cancel() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = with_retry(config(), &clock, &cancel, |_| async {
            Err::<(), _>(SourceError::Timeout("slow".to_string()))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, SourceError::Cancelled));
    }
}
