//! Cookie-encoded credentials sent by the browser UI

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Credentials and provider settings carried by one request's cookies
#[derive(Debug, Clone, Default)]
pub struct CookieCredentials {
    /// Provider name -> API key, from the `apiKeys` cookie
    pub api_keys: HashMap<String, String>,
    /// Provider name -> settings object, from the `providers` cookie
    pub provider_settings: HashMap<String, Value>,
}

/// Split a `Cookie` header into name/value pairs; values stay URI-encoded
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

impl CookieCredentials {
    /// Parse the `apiKeys` and `providers` cookies out of a raw `Cookie` header
    pub fn from_cookie_header(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Self::default();
        };
        let cookies = parse_cookie_header(header);

        let api_keys = cookies
            .get("apiKeys")
            .and_then(|raw| decode_json_cookie("apiKeys", raw))
            .and_then(|value| match value {
                Value::Object(map) => Some(
                    map.into_iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        let provider_settings = cookies
            .get("providers")
            .and_then(|raw| decode_json_cookie("providers", raw))
            .and_then(|value| match value {
                Value::Object(map) => Some(map.into_iter().collect()),
                _ => None,
            })
            .unwrap_or_default();

        Self {
            api_keys,
            provider_settings,
        }
    }
}

fn decode_json_cookie(name: &str, raw: &str) -> Option<Value> {
    let decoded = match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!("Ignoring {} cookie with invalid encoding: {}", name, e);
            return None;
        }
    };

    match serde_json::from_str(&decoded) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {} cookie with invalid JSON: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("theme=dark; apiKeys=%7B%7D;  empty=");
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(cookies.get("apiKeys").map(String::as_str), Some("%7B%7D"));
        assert_eq!(cookies.get("empty").map(String::as_str), Some(""));
    }

    #[test]
    fn test_credentials_from_encoded_cookies() {
        let api_keys = urlencoding::encode(r#"{"OpenAI":"sk-1","Groq":"gsk-2"}"#);
        let providers = urlencoding::encode(r#"{"OpenAI":{"enabled":true,"baseUrl":""}}"#);
        let header = format!("apiKeys={}; providers={}", api_keys, providers);

        let creds = CookieCredentials::from_cookie_header(Some(&header));
        assert_eq!(creds.api_keys.get("OpenAI").map(String::as_str), Some("sk-1"));
        assert_eq!(creds.api_keys.len(), 2);
        assert_eq!(creds.provider_settings["OpenAI"]["enabled"], true);
    }

    #[test]
    fn test_malformed_cookies_are_ignored() {
        let creds = CookieCredentials::from_cookie_header(Some("apiKeys=not-json; providers=%5B%5D"));
        assert!(creds.api_keys.is_empty());
        assert!(creds.provider_settings.is_empty());

        let none = CookieCredentials::from_cookie_header(None);
        assert!(none.api_keys.is_empty());
    }
}
