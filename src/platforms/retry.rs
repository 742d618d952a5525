//! Retry with exponential backoff for exchange calls.
//!
//! Only errors classified as transient are retried: rate limits, 5xx
//! responses and transport-level timeouts or connection failures.
//! Authentication failures and order rejections surface immediately.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::{MAX_RETRIES, RETRY_BACKOFF_MULTIPLIER, RETRY_DELAY_SECONDS};
use crate::types::BotError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay_ms: (RETRY_DELAY_SECONDS * 1000.0) as u64,
            backoff_factor: RETRY_BACKOFF_MULTIPLIER,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Whether an error chain is worth retrying.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(bot) = err.downcast_ref::<BotError>() {
        return bot.is_retryable();
    }
    if let Some(http) = err.downcast_ref::<reqwest::Error>() {
        return http.is_timeout() || http.is_connect();
    }
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|e| e.is_timeout() || e.is_connect())
            .unwrap_or(false)
    })
}

/// Run `f` until it succeeds, fails permanently, or the retry budget is spent.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut f: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt > config.max_retries {
                    warn!(op = op_name, attempts = attempt, error = %err, "Giving up after retries");
                    return Err(err);
                }
                let delay = config.delay_for(attempt);
                debug!(
                    op = op_name,
                    attempt,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
