use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;
use crate::services::llm::{LlmBackend, LlmRequest, LlmResponse};

/// Bounded retry for one LLM call site. Only transient provider errors are
/// retried; the final error is returned to the caller as a value.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        }
    }

    /// No waiting between attempts; for tests and local fakes.
    pub fn immediate(max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    pub async fn call(
        &self,
        backend: &dyn LlmBackend,
        request: &LlmRequest,
    ) -> Result<LlmResponse, ProviderError> {
        let attempt = || async { backend.complete(request).await };
        attempt
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, delay: Duration| {
                warn!(
                    provider = backend.name(),
                    variant = request.variant.name(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retrying LLM call"
                );
            })
            .await
    }
}
