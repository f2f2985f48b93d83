use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

/// Fixed-attempt, fixed-delay retry policy applied to every network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the
    /// last error. Non-idempotent operations are retried too, so callers must
    /// only pass operations that are safe to repeat.
    pub async fn run<T, E, F, Fut>(&self, what: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let backoff = ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times((attempts - 1) as usize);

        let mut attempt = 0u32;
        op.retry(&backoff)
            .notify(|e: &E, delay: Duration| {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    attempts,
                    "{} failed, retrying in {:?}: {}",
                    what,
                    delay,
                    e
                );
            })
            .await
            .inspect_err(|e| {
                tracing::error!(attempts, "{} failed after all retries: {}", what, e);
            })
    }
}
