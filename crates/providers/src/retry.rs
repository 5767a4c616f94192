//! Retry engine — bounded exponential backoff with jitter.
//!
//! Every failure is classified first; only transient faults are retried.
//! Delay for attempt `n` is `min(base · 2^n, max) · (0.5 + rand·0.5)`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use aw_domain::error::{Error, Result};

use crate::classify::classify;

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so up to `max_retries + 1` calls).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Label used in log lines.
    pub label: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 16_000,
            label: None,
        }
    }
}

impl RetryPolicy {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Jittered delay for the given 0-indexed attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(20); // prevent overflow
        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let jitter_factor = 0.5 + rand::thread_rng().gen::<f64>() * 0.5;
        Duration::from_millis((capped as f64 * jitter_factor) as u64)
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Non-retryable failures propagate immediately; after exhausting retries
/// the last error is rethrown unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let label = policy.label.as_deref().unwrap_or("operation");
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classified = classify(&err);
                if !classified.retryable || attempt >= policy.max_retries {
                    if classified.retryable {
                        tracing::warn!(
                            label,
                            attempts = attempt + 1,
                            error = %err,
                            "retries exhausted"
                        );
                    }
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    class = ?classified.class,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
