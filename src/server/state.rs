//! Shared server state

use crate::chat::ModelDefaults;
use crate::config::Config;
use crate::context::{MemorySummaryCache, SummaryCache};
use crate::llm::{LlmError, LlmProvider, LlmProviderFactory};
use crate::utils::config::ProviderSettings;
use crate::utils::errors::KaiError;
use crate::Result;
use std::sync::Arc;

/// Creates backends from resolved provider settings
pub trait ProviderRegistry: Send + Sync {
    fn create_provider(
        &self,
        provider_name: &str,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn LlmProvider>>;
}

/// Registry backed by the OpenAI-compatible provider factory
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProviders;

impl ProviderRegistry for DefaultProviders {
    fn create_provider(
        &self,
        provider_name: &str,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn LlmProvider>> {
        LlmProviderFactory::create_provider(provider_name, settings).map_err(|e| match e {
            LlmError::Authentication { .. } => KaiError::missing_api_key(provider_name),
            other => other.into(),
        })
    }
}

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Process-wide summary cache
    pub cache: Arc<dyn SummaryCache>,
    pub providers: Arc<dyn ProviderRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(MemorySummaryCache::new(config.pipeline.summary_ttl()));
        Self {
            config: Arc::new(config),
            cache,
            providers: Arc::new(DefaultProviders),
        }
    }

    pub fn with_providers(mut self, providers: Arc<dyn ProviderRegistry>) -> Self {
        self.providers = providers;
        self
    }

    /// Model and provider for requests without hints
    pub fn model_defaults(&self) -> ModelDefaults {
        ModelDefaults {
            model: self.config.default_model.clone(),
            provider: self.config.default_provider.clone(),
        }
    }
}
