//! Bounded exponential backoff for transport calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;

use crate::core::{RetryConfig, Result};

/// Waits between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Retries retryable failures with exponential backoff and jitter.
///
/// The delay before retry `n` is drawn from `[c/2, c]` where
/// `c = min(max_delay, base_delay * 2^(n-1))`; with jitter disabled it is `c`.
/// Delays within one call never decrease. The error of the last attempt is
/// returned unchanged.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the timer, e.g. to record delays in tests
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Upper bound of the delay before retry `retry` (1-based)
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay before retry `retry`, never shorter than `previous`
    pub fn delay_for(&self, retry: u32, previous: Duration) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_millis() as u64;
        let ms = if self.config.jitter && ceiling > 0 {
            let half = ceiling / 2;
            half + rand::thread_rng().gen_range(0..=ceiling - half)
        } else {
            ceiling
        };
        Duration::from_millis(ms).max(previous)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut previous = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{} succeeded on attempt {}/{}", operation, attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt, previous);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}ms",
                        operation,
                        attempt,
                        max_attempts,
                        err,
                        delay.as_millis()
                    );
                    self.sleeper.sleep(delay).await;
                    previous = delay;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        log::warn!("{} failed after {} attempts: {}", operation, attempt, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config).finish()
    }
}
