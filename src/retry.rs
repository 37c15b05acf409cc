use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use crate::config::Config;
use crate::error::StoreError;

/// Backoff for idempotent writes. Only transient database failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_times: usize,
    pub min_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_times: config.write_retry_max_times,
            min_delay: config.write_retry_min_delay,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.min_delay * 50)
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    f.retry(policy.backoff())
        .when(StoreError::is_transient)
        .notify(|err: &StoreError, delay: Duration| {
            warn!("{} failed, retrying in {:?}: {}", operation, delay, err);
        })
        .await
}
