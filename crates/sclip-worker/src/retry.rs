//! Retry with exponential backoff for calls to external services.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each further failure.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after the given failed attempt (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, the attempts run out, or `should_retry`
/// rejects an error.
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && should_retry(&e) => {
                let delay = config.delay_after(attempt);
                debug!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, config.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    config.operation_name, attempt, e
                );
                return Err((e, attempt));
            }
        }
    }
}
