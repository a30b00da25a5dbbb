//! Shared HTTP utilities for model backends
//!
//! Client setup, retry policy and error mapping used by every
//! OpenAI-compatible provider.

use crate::llm::LlmError;
use std::time::Duration;

pub mod client;
pub mod headers;
pub mod retry;

pub use client::{HttpClient, HttpClientConfig};
pub use headers::HeaderBuilder;
pub use retry::{execute_with_retry, RetryConfig};

/// Whole-request timeout for non-streaming calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest silence between two reads of a response body; streamed
/// generations are bounded only by this
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of retry attempts
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// Default delay between retries
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// User agent sent to backends
pub const USER_AGENT: &str = concat!("kai-relay/", env!("CARGO_PKG_VERSION"));

/// Map a non-success backend response to an `LlmError`
pub fn parse_http_error(status: u16, body: &str, model_name: Option<&str>) -> LlmError {
    match status {
        429 => LlmError::RateLimit {
            retry_after: extract_retry_after(body),
        },
        401 | 403 => LlmError::Authentication {
            message: extract_error_message(body)
                .unwrap_or_else(|| "Invalid API key or insufficient permissions".to_string()),
        },
        400 | 404
            if body.contains("model")
                && (body.contains("not found")
                    || body.contains("invalid")
                    || body.contains("does not exist")) =>
        {
            LlmError::InvalidModel {
                model: model_name.unwrap_or("unknown").to_string(),
            }
        }
        _ => LlmError::RequestFailed {
            status,
            message: extract_error_message(body).unwrap_or_else(|| body.to_string()),
        },
    }
}

/// Pull `error.message` out of an OpenAI-style error body
fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("retry_after")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|v| v.as_u64())
        })
}
