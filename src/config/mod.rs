//! Configuration management for the KAI relay

use crate::utils::errors::{ConfigError, KaiError};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider used when a request carries no provider hint
    pub default_provider: String,
    /// Model used when a request carries no model hint
    pub default_model: String,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Provider configurations
    pub providers: HashMap<String, ProviderConfig>,
    /// Streaming and context-optimization settings
    pub pipeline: PipelineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key for the provider (environment and cookies take precedence)
    pub api_key: Option<String>,
    /// Base URL for the provider API
    pub base_url: Option<String>,
    /// Default model to use with this provider
    pub default_model: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
}

/// Settings for the summarize / select / generate pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of generation calls for one turn
    pub max_response_segments: u32,
    /// Max output tokens per generation call
    pub max_tokens: u32,
    /// How long a cached summary stays valid
    pub summary_ttl_secs: u64,
    /// Messages per summarization batch
    pub summary_batch_size: usize,
    /// Cache key used when a request carries no prompt id
    pub default_prompt_id: String,
    /// Absolute project root that file paths are reported relative to
    pub project_root: String,
    /// Upper bound on files the selector adds per turn
    pub max_context_files: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: "openrouter".to_string(),
            default_model: "anthropic/claude-3.5-sonnet".to_string(),
            server: ServerConfig::default(),
            providers: HashMap::new(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5174".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_response_segments: 2,
            max_tokens: 8000,
            summary_ttl_secs: 10 * 60,
            summary_batch_size: 50,
            default_prompt_id: "default".to_string(),
            project_root: "/home/project".to_string(),
            max_context_files: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Summary time-to-live as a duration
    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_secs)
    }
}

impl ProviderConfig {
    /// Known base URL for OpenAI-compatible providers
    pub fn get_base_url_for_provider(provider_name: &str) -> Option<String> {
        let url = match provider_name.to_lowercase().as_str() {
            "openrouter" => "https://openrouter.ai/api/v1",
            "openai" => "https://api.openai.com/v1",
            "deepseek" => "https://api.deepseek.com/v1",
            "groq" => "https://api.groq.com/openai/v1",
            "together" => "https://api.together.xyz/v1",
            "mistral" => "https://api.mistral.ai/v1",
            "lmstudio" => "http://127.0.0.1:1234/v1",
            _ => return None,
        };
        Some(url.to_string())
    }
}

/// Configuration manager for loading and saving the relay configuration
pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from the default location, creating it if missing
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::from_path(config_path)
    }

    /// Load configuration from an explicit path, creating it if missing
    pub fn from_path<P: Into<PathBuf>>(config_path: P) -> Result<Self> {
        let config_path = config_path.into();
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_path, &default_config)?;
            default_config
        };

        config.validate()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the backing configuration file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the default configuration file path
    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::FileNotFound {
            path: PathBuf::from("config directory"),
        })?;

        Ok(config_dir.join("kai-relay").join("config.toml"))
    }

    /// Load configuration from file
    fn load_config(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError { source: e })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { source: e })
            .map_err(Into::into)
    }

    /// Save configuration to file
    fn save_config(path: &Path, config: &Config) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
            }
        }

        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

impl Config {
    /// Configuration for a provider, if one is declared
    pub fn provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name).or_else(|| {
            self.providers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, provider)| provider)
        })
    }

    /// Base URL for a provider: explicit configuration first, then the known default
    pub fn base_url_for(&self, provider_name: &str) -> Option<String> {
        self.provider_config(provider_name)
            .and_then(|p| p.base_url.clone())
            .or_else(|| ProviderConfig::get_base_url_for_provider(provider_name))
    }

    /// Check if the configuration is valid
    pub fn validate(&self) -> Result<()> {
        if self.default_provider.trim().is_empty() {
            return Err(KaiError::validation(
                "default_provider",
                "A default provider must be configured",
            ));
        }

        if self.pipeline.max_response_segments == 0 {
            return Err(KaiError::validation(
                "pipeline.max_response_segments",
                "At least one response segment is required",
            ));
        }

        if self.pipeline.summary_batch_size == 0 {
            return Err(KaiError::validation(
                "pipeline.summary_batch_size",
                "Summary batches must hold at least one message",
            ));
        }

        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(KaiError::validation(
                "server.addr",
                format!("Invalid listen address: {}", self.server.addr),
            ));
        }

        for (name, provider) in &self.providers {
            if let Some(base_url) = &provider.base_url {
                url::Url::parse(base_url).map_err(|e| {
                    KaiError::validation(
                        format!("providers.{}.base_url", name),
                        format!("Invalid URL '{}': {}", base_url, e),
                    )
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.summary_ttl(), Duration::from_secs(600));
        assert_eq!(config.pipeline.summary_batch_size, 50);
        assert_eq!(config.pipeline.max_response_segments, 2);
    }

    #[test]
    fn test_manager_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let manager = ConfigManager::from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.config().default_provider, "openrouter");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
default_provider = "openai"

[pipeline]
max_response_segments = 4

[providers.openai]
base_url = "http://localhost:9999/v1"
"#,
        )
        .unwrap();

        let manager = ConfigManager::from_path(&path).unwrap();
        let config = manager.config();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.pipeline.max_response_segments, 4);
        assert_eq!(config.pipeline.max_tokens, 8000);
        assert_eq!(
            config.base_url_for("openai").as_deref(),
            Some("http://localhost:9999/v1")
        );
        assert_eq!(
            config.base_url_for("groq").as_deref(),
            Some("https://api.groq.com/openai/v1")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.pipeline.max_response_segments = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.insert(
            "custom".to_string(),
            ProviderConfig {
                base_url: Some("not a url".to_string()),
                ..ProviderConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }
}
