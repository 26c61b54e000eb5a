//! Minimum-spacing rate limiter shared by every outbound call to the upstream host.
//!
//! The limiter keeps a single "time of last call" checkpoint. Acquiring it reads
//! the checkpoint, sleeps for whatever remains of the minimum delay and writes
//! the new time, all under one async mutex guard so two callers can never
//! observe the same checkpoint.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sources::SourceError;

/// Time source used for rate limiting and backoff
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio's timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock that only advances when slept on
///
/// Every sleep is recorded and returns immediately, which lets tests assert
/// exact spacing and backoff schedules without waiting.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: std::sync::Mutex<Duration>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: std::sync::Mutex::new(Duration::ZERO),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Total time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Enforces a minimum delay between consecutive calls
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter on the system clock
    pub fn new(min_delay: Duration) -> Self {
        Self::with_clock(min_delay, Arc::new(SystemClock))
    }

    /// Create a limiter on a custom clock
    pub fn with_clock(min_delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
            clock,
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Clock used for waiting; shared with retry backoff
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Wait until a call is allowed, then claim the slot
    ///
    /// Returns [`SourceError::Cancelled`] if the token fires while waiting; the
    /// checkpoint is left untouched in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), SourceError> {
        let mut last_call = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            guard = self.last_call.lock() => guard,
        };

        if let Some(previous) = *last_call {
            let since = self.clock.now().saturating_duration_since(previous);
            if since < self.min_delay {
                let wait = self.min_delay - since;
                tracing::trace!("Rate limit: waiting {:?}", wait);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                    _ = self.clock.sleep(wait) => {}
                }
            }
        }

        *last_call = Some(self.clock.now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(3), clock.clone());

        limiter.acquire(&CancellationToken::new()).await.unwrap();
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(3), clock.clone());
        let cancel = CancellationToken::new();

        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.acquire(&cancel).await.unwrap();
            stamps.push(clock.now());
        }

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(3));
        }
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_only_remaining_delay_is_slept() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(3), clock.clone());
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();
        clock.advance(Duration::from_secs(2));
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);

        clock.advance(Duration::from_secs(10));
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        cancel.cancel();
        let result = limiter.acquire(&cancel).await;
        assert!(matches!(result, Err(SourceError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shared_limiter_serializes_tasks() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(
            Duration::from_millis(500),
            clock.clone(),
        ));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            let clock = clock.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&cancel).await.unwrap();
                clock.now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }
}
