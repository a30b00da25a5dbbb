//! KAI Relay - conversation streaming and context optimization for AI pair programming
//!
//! This library provides the server side of a browser chat UI: message
//! normalization, rolling conversation summaries, context file selection and a
//! multi-segment response stream with ordered progress annotations.

pub mod chat;
pub mod config;
pub mod context;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod stream;
pub mod utils;

// Re-export commonly used types and traits
pub use chat::{ChatMessage, ChatRequest};
pub use config::{Config, ConfigManager, ProviderConfig};
pub use context::{BatchSummarizer, ContextSelector, MemorySummaryCache, SummaryCache};
pub use llm::{LlmError, LlmProvider, LlmProviderFactory, Message};
pub use pipeline::{ChatPipeline, PipelineRequest};
pub use server::AppState;
pub use stream::{ProgressEmitter, StreamEvent};
pub use utils::errors::{ConfigError, KaiError};

/// The main result type used throughout the application
pub type Result<T> = std::result::Result<T, KaiError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "kai-relay";
