//! Shared configuration access: API key and provider settings resolution
//!
//! Credentials reach the relay three ways: the `apiKeys` cookie sent by the
//! browser, `<PROVIDER>_API_KEY` environment variables, and the config file.

use crate::config::Config;
use std::collections::HashMap;

pub mod cookies;

pub use cookies::{CookieCredentials, parse_cookie_header};

/// Provider settings handed to the LLM factory
pub type ProviderSettings = HashMap<String, String>;

/// Centralized API key resolution logic
pub struct ApiKeyResolver;

impl ApiKeyResolver {
    /// Resolve an API key: request cookie first, then environment, then config file
    pub fn resolve_api_key(
        provider_name: &str,
        cookie_keys: &HashMap<String, String>,
        config_api_key: Option<&str>,
    ) -> Option<String> {
        if let Some(key) = lookup_ignore_case(cookie_keys, provider_name) {
            if !key.trim().is_empty() {
                return Some(key.clone());
            }
        }

        let env_key = Self::env_key_name(provider_name);
        if let Ok(api_key) = std::env::var(&env_key) {
            if !api_key.trim().is_empty() {
                return Some(api_key);
            }
        }

        config_api_key
            .filter(|key| !key.trim().is_empty())
            .map(|s| s.to_string())
    }

    /// Get environment variable name for provider
    pub fn env_key_name(provider_name: &str) -> String {
        format!("{}_API_KEY", provider_name.to_uppercase().replace('-', "_"))
    }
}

/// Build the settings map for a provider from config plus per-request credentials
pub fn provider_settings(
    config: &Config,
    provider_name: &str,
    credentials: &CookieCredentials,
) -> ProviderSettings {
    let mut settings = HashMap::new();
    let provider_config = config.provider_config(provider_name);

    if let Some(api_key) = ApiKeyResolver::resolve_api_key(
        provider_name,
        &credentials.api_keys,
        provider_config.and_then(|p| p.api_key.as_deref()),
    ) {
        settings.insert("api_key".to_string(), api_key);
    }

    // A per-request baseUrl from the providers cookie overrides the configured one
    let request_base_url = lookup_ignore_case(&credentials.provider_settings, provider_name)
        .and_then(|value| value.get("baseUrl"))
        .and_then(|value| value.as_str())
        .filter(|url| !url.trim().is_empty())
        .map(|url| url.to_string());

    if let Some(base_url) = request_base_url.or_else(|| config.base_url_for(provider_name)) {
        settings.insert("base_url".to_string(), base_url);
    }

    settings
}

/// Provider names arrive as display names ("OpenAI") or ids ("openai")
fn lookup_ignore_case<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_key_takes_precedence() {
        std::env::set_var("COOKIE_FIRST_API_KEY", "env-key");
        let mut cookie_keys = HashMap::new();
        cookie_keys.insert("Cookie_First".to_string(), "cookie-key".to_string());

        let result =
            ApiKeyResolver::resolve_api_key("cookie_first", &cookie_keys, Some("config-key"));
        assert_eq!(result, Some("cookie-key".to_string()));

        std::env::remove_var("COOKIE_FIRST_API_KEY");
    }

    #[test]
    fn test_api_key_resolver_env_precedence() {
        std::env::set_var("ENV_FIRST_API_KEY", "env-key");

        let result = ApiKeyResolver::resolve_api_key("env_first", &HashMap::new(), Some("config-key"));
        assert_eq!(result, Some("env-key".to_string()));

        std::env::remove_var("ENV_FIRST_API_KEY");
    }

    #[test]
    fn test_api_key_resolver_config_fallback() {
        std::env::remove_var("CONFIG_ONLY_API_KEY");

        let result = ApiKeyResolver::resolve_api_key("config_only", &HashMap::new(), Some("config-key"));
        assert_eq!(result, Some("config-key".to_string()));

        let blank = ApiKeyResolver::resolve_api_key("config_only", &HashMap::new(), Some("  "));
        assert_eq!(blank, None);
    }

    #[test]
    fn test_env_key_name_generation() {
        assert_eq!(ApiKeyResolver::env_key_name("openrouter"), "OPENROUTER_API_KEY");
        assert_eq!(ApiKeyResolver::env_key_name("lm-studio"), "LM_STUDIO_API_KEY");
    }

    #[test]
    fn test_provider_settings_use_request_base_url() {
        let config = Config::default();
        let mut credentials = CookieCredentials::default();
        credentials
            .api_keys
            .insert("openai".to_string(), "sk-test".to_string());
        credentials.provider_settings.insert(
            "openai".to_string(),
            serde_json::json!({ "baseUrl": "http://localhost:8080/v1" }),
        );

        let settings = provider_settings(&config, "openai", &credentials);
        assert_eq!(settings.get("api_key").map(String::as_str), Some("sk-test"));
        assert_eq!(
            settings.get("base_url").map(String::as_str),
            Some("http://localhost:8080/v1")
        );
    }
}
