//! Retry logic for backend requests

use crate::llm::LlmError;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            exponential_backoff: true,
        }
    }
}

/// Execute an operation, retrying rate limits, network failures and 5xx responses
pub async fn execute_with_retry<F, Fut, T>(operation: F, config: &RetryConfig) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if attempt < config.max_attempts && is_retryable_error(&error) => {
                let delay = calculate_delay(&error, attempt, config);
                warn!(
                    "Backend request failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    config.max_attempts + 1,
                    delay,
                    error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Check if an error is retryable
pub fn is_retryable_error(error: &LlmError) -> bool {
    match error {
        LlmError::RateLimit { .. } => true,
        LlmError::Network(_) => true,
        LlmError::RequestFailed { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Calculate delay for retry attempt
fn calculate_delay(error: &LlmError, attempt: usize, config: &RetryConfig) -> Duration {
    match error {
        LlmError::RateLimit {
            retry_after: Some(retry_after),
        } => std::cmp::min(Duration::from_secs(*retry_after), config.max_delay),
        _ if config.exponential_backoff => {
            let factor = 2_u32.saturating_pow(attempt as u32);
            std::cmp::min(config.base_delay.saturating_mul(factor), config.max_delay)
        }
        _ => config.base_delay,
    }
}
