//! LLM provider abstraction and implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::utils::errors::KaiError;

pub mod openai;
pub mod prompts;
pub mod streaming;
pub mod utils;

#[cfg(test)]
pub mod mock;

pub use prompts::{PromptContext, PromptTemplate, PromptTemplates};
pub use streaming::{LlmStream, StreamPart};
pub use utils::{CumulativeUsage, TokenCounter};

/// Error types for LLM operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Invalid model: {model}")]
    InvalidModel { model: String },

    #[error("Request failed: {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Invalid response format: {message}")]
    InvalidResponse { message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

/// A message sent to the model backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Configuration for LLM generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: Some(8000),
            top_p: None,
            stop_sequences: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Self::default()
        }
    }
}

/// Why the backend stopped producing tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

impl FinishReason {
    /// Map an OpenAI-style finish reason string
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "eos" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "error" => Self::Error,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Response from a non-streaming generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// Response text, empty when the backend returned none
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Model information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// The model backend contract used by every pipeline stage
///
/// `generate` is the non-streaming call used by the summarizer and the
/// context selector; `generate_stream` drives the client-visible response.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openrouter", "openai")
    fn provider_name(&self) -> &str;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    /// Generate a complete response
    async fn generate(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<LlmResponse, LlmError>;

    /// Generate a streaming response of typed parts
    async fn generate_stream(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<LlmStream, LlmError>;
}

/// A provider paired with the model every call of one request uses
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: ModelInfo,
}

impl ResolvedModel {
    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn model_id(&self) -> &str {
        &self.model.id
    }
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.model.id)
            .finish()
    }
}

/// Pick the model for a request.
///
/// A provider with no models is fatal. A requested id the provider does not
/// list falls back to the provider's first model.
pub async fn resolve_model(
    provider: Arc<dyn LlmProvider>,
    requested: &str,
) -> Result<ResolvedModel, KaiError> {
    let mut models = provider.list_models().await?;
    if models.is_empty() {
        return Err(KaiError::provider_has_no_models(provider.provider_name()));
    }

    let index = match models.iter().position(|m| m.id == requested) {
        Some(index) => index,
        None => {
            warn!(
                "Model '{}' not found for provider '{}', falling back to '{}'",
                requested,
                provider.provider_name(),
                models[0].id
            );
            0
        }
    };

    let model = models.swap_remove(index);
    Ok(ResolvedModel { provider, model })
}

/// Factory for creating LLM providers
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    /// Create a provider by name from resolved settings (`api_key`, `base_url`)
    pub fn create_provider(
        provider_name: &str,
        settings: &HashMap<String, String>,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let name = provider_name.to_lowercase();
        let base_url = settings.get("base_url").ok_or_else(|| LlmError::Unknown {
            message: format!("Unknown provider: {}", provider_name),
        })?;

        let api_key = match settings.get("api_key") {
            Some(key) => Some(key.clone()),
            None if Self::is_local(&name) => None,
            None => {
                return Err(LlmError::Authentication {
                    message: format!("{} API key not provided", provider_name),
                })
            }
        };

        let provider = openai::OpenAiCompatibleProvider::new(name, base_url.clone(), api_key)?;
        Ok(Arc::new(provider))
    }

    /// Providers that run locally and accept unauthenticated requests
    fn is_local(provider_name: &str) -> bool {
        matches!(provider_name, "lmstudio" | "ollama")
    }

    /// List all provider names with a built-in base URL
    pub fn list_providers() -> Vec<&'static str> {
        vec![
            "openrouter",
            "openai",
            "deepseek",
            "groq",
            "together",
            "mistral",
            "lmstudio",
        ]
    }
}
