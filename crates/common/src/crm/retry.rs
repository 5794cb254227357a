//! Bounded retry with linear backoff for CRM calls

use std::future::Future;
use std::time::Duration;

use super::CrmError;
use crate::config::CrmConfig;
use crate::metrics::record_crm_retry;

/// Retry policy applied to every CRM HTTP call.
///
/// Only retryable errors (`CrmError::is_retryable`) are retried. The wait
/// after the n-th failed attempt is `n * base_delay`; the last error is
/// returned unchanged once attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, method: &str, mut operation: F) -> Result<T, CrmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CrmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        method = method,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "CRM request failed, retrying"
                    );
                    record_crm_retry(method);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
