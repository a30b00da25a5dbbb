//! HTTP client configuration and management

use super::retry::RetryConfig;
use super::{
    DEFAULT_READ_TIMEOUT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT, USER_AGENT,
};
use crate::llm::LlmError;
use reqwest::Client;
use std::time::Duration;

/// Configuration for HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applied per request to non-streaming calls only
    pub request_timeout: Duration,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            user_agent: Some(USER_AGENT.to_string()),
        }
    }
}

/// Wrapper around reqwest::Client with shared configuration
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, LlmError> {
        let mut builder = Client::builder()
            .read_timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout);

        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().map_err(LlmError::Network)?;

        Ok(Self { client, config })
    }

    /// Create a new HTTP client with default configuration
    pub fn with_defaults() -> Result<Self, LlmError> {
        Self::new(HttpClientConfig::default())
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whole-request timeout for calls whose body is read in one go
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Retry policy derived from this client's configuration
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.config.retry_attempts,
            base_delay: self.config.retry_delay,
            max_delay: self.config.retry_delay * 10,
            exponential_backoff: true,
        }
    }
}
