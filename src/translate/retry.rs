use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::TranslatorConfig;
use crate::error::Result;

/// Exponential backoff for transient upstream failures, bounded both by attempts and by
/// total elapsed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            max_elapsed: Duration::from_secs(config.max_retry_time_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    if started.elapsed() + delay > self.max_elapsed {
                        warn!("{} failed and retry time is exhausted: {}", label, e);
                        return Err(e);
                    }
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
