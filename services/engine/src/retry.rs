use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};

/// Reload-and-retry policy for transaction conflicts
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
    base: Duration,
    max: Duration,
}

impl RetryStrategy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.base_ms.max(1)),
            max: Duration::from_millis(config.max_ms.max(config.base_ms).max(1)),
        }
    }

    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base)
            .with_max_interval(self.max)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Run `attempt` until it stops conflicting. Each call must reload the
    /// state it acts on. Exhaustion fails closed with `Transient`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(EngineError::Conflict(key)) if self.should_retry(retries) => {
                    retries += 1;
                    metrics::counter!("conflict_retries_total", "operation" => operation.to_string())
                        .increment(1);
                    let delay = backoff.next_backoff().unwrap_or(self.max);
                    tracing::debug!(
                        operation,
                        conflict = %key,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Conflict, retrying"
                    );
                    sleep(delay).await;
                }
                Err(EngineError::Conflict(key)) => {
                    tracing::warn!(operation, conflict = %key, attempts = retries + 1, "Retries exhausted");
                    return Err(EngineError::Transient {
                        operation: operation.to_string(),
                        attempts: retries + 1,
                    });
                }
                other => return other,
            }
        }
    }
}
