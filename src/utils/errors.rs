//! Error types used throughout the relay

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the KAI relay
#[derive(Error, Debug)]
pub enum KaiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Context error: {message}")]
    Context { message: String },

    #[error("Summary error: {message}")]
    Summary { message: String },

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration: {source}")]
    ReadError {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration: {source}")]
    WriteError {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError {
        #[source]
        source: toml::ser::Error,
    },
}

impl KaiError {
    /// Create standardized error for a provider without an API key
    pub fn missing_api_key(provider: &str) -> Self {
        Self::authentication(format!(
            "Missing API key for {}. Set {} or send it in the apiKeys cookie.",
            provider,
            crate::utils::config::ApiKeyResolver::env_key_name(provider)
        ))
    }

    /// Create standardized error for a provider with no usable models
    pub fn provider_has_no_models(provider: &str) -> Self {
        Self::provider(provider, "No models available for the configured provider")
    }

    /// Create a new context error
    pub fn context<S: Into<String>>(message: S) -> Self {
        Self::Context {
            message: message.into(),
        }
    }

    /// Create a new summary error
    pub fn summary<S: Into<String>>(message: S) -> Self {
        Self::Summary {
            message: message.into(),
        }
    }

    /// Create a new provider error
    pub fn provider<S1: Into<String>, S2: Into<String>>(provider: S1, message: S2) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new cancelled error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a new unknown error
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Whether this error should be reported as an authentication failure (HTTP 401)
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Llm(crate::llm::LlmError::Authentication { .. })
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Llm(_) => "llm",
            Self::Context { .. } => "context",
            Self::Summary { .. } => "summary",
            Self::Provider { .. } => "provider",
            Self::Authentication { .. } => "auth",
            Self::Validation { .. } => "validation",
            Self::Cancelled { .. } => "cancelled",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Unknown { .. } => "unknown",
        }
    }
}
