//! Bounded exponential-backoff retries.
//!
//! The retry loop only absorbs transient failures (connection, timeout). A
//! rejected call from an open circuit, a definitive 5xx answer, or a
//! configuration gap propagates immediately: retrying any of those would
//! either hammer a breaker that just said no or repeat a request the backend
//! already answered.
use std::{future::Future, time::Duration};

use tracing::debug;

use crate::core::error::ProxyResult;

/// Retry budget for one dispatch: `max_retries` additional attempts after the
/// initial one, sleeping `base_delay * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Backoff before the retry following zero-based attempt `attempt`
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Runs operations under a [`RetryPolicy`]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Attempt `op` up to `max_retries + 1` times.
    ///
    /// The closure receives the zero-based attempt index. After the budget is
    /// exhausted the last error is returned unchanged.
    pub async fn run<T, F, Fut>(policy: RetryPolicy, mut op: F) -> ProxyResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProxyResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
