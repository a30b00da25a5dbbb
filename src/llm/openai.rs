//! OpenAI-compatible provider (OpenRouter, OpenAI, DeepSeek, Groq, LM Studio, ...)

use super::streaming::ChatCompletionDecoder;
use super::{
    FinishReason, GenerationConfig, LlmError, LlmProvider, LlmResponse, LlmStream, Message,
    ModelInfo, StreamPart, TokenUsage,
};
use crate::utils::http::{
    execute_with_retry, parse_http_error, HeaderBuilder, HttpClient, RetryConfig,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Provider speaking the `/models` and `/chat/completions` API
pub struct OpenAiCompatibleProvider {
    name: String,
    client: HttpClient,
    api_key: Option<String>,
    base_url: String,
    retry_config: RetryConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a provider for `base_url`; `api_key` may be absent for local servers
    pub fn new(name: String, base_url: String, api_key: Option<String>) -> Result<Self, LlmError> {
        let client = HttpClient::with_defaults()?;
        let retry_config = client.retry_config();
        Ok(Self {
            name,
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config,
        })
    }

    fn create_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut builder = HeaderBuilder::new().json_content_type();

        if let Some(api_key) = &self.api_key {
            builder = builder
                .bearer_auth(api_key)
                .map_err(|_| LlmError::Authentication {
                    message: "API key contains invalid characters".to_string(),
                })?;
        }

        if self.name == "openrouter" {
            builder = builder
                .static_header("http-referer", "https://github.com/ReOpsIL/kai-relay")
                .static_header("x-title", "kai-relay");
        }

        Ok(builder.build())
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        config: Option<&GenerationConfig>,
        stream: bool,
    ) -> Result<Value, LlmError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            wire_messages.push(json!({ "role": "system", "content": system }));
        }
        for message in messages {
            wire_messages.push(json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
        }

        let mut body = json!({
            "model": model,
            "messages": wire_messages,
        });

        if let Some(config) = config {
            if let Some(temp) = config.temperature {
                body["temperature"] = temp.into();
            }
            if let Some(max_tokens) = config.max_tokens {
                body["max_tokens"] = max_tokens.into();
            }
            if let Some(top_p) = config.top_p {
                body["top_p"] = top_p.into();
            }
            if let Some(stop) = &config.stop_sequences {
                body["stop"] = serde_json::to_value(stop)?;
            }
        }

        if stream {
            body["stream"] = true.into();
            body["stream_options"] = json!({ "include_usage": true });
        }

        Ok(body)
    }

    /// Chat completion request; streamed calls carry no whole-request timeout
    fn chat_request(&self, body: &Value, stream: bool) -> Result<reqwest::RequestBuilder, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self
            .client
            .client()
            .post(&url)
            .headers(self.create_headers()?)
            .json(body);

        Ok(if stream {
            request
        } else {
            request.timeout(self.client.request_timeout())
        })
    }

    async fn post_chat(
        &self,
        body: &Value,
        model: &str,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self.chat_request(body, stream)?.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body, Some(model)));
        }

        Ok(response)
    }

    fn parse_models(body: &Value) -> Result<Vec<ModelInfo>, LlmError> {
        let data = body["data"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "Expected 'data' array in models response".to_string(),
            })?;

        Ok(data
            .iter()
            .filter_map(|model| {
                let id = model["id"].as_str()?;
                Some(ModelInfo {
                    id: id.to_string(),
                    name: model["name"].as_str().unwrap_or(id).to_string(),
                    context_length: model["context_length"].as_u64().map(|n| n as u32),
                    max_output_tokens: model["max_completion_tokens"]
                        .as_u64()
                        .or_else(|| model["top_provider"]["max_completion_tokens"].as_u64())
                        .map(|n| n as u32),
                })
            })
            .collect())
    }

    fn parse_completion(body: &Value) -> Result<LlmResponse, LlmError> {
        if let Some(error) = body.get("error") {
            return Err(LlmError::RequestFailed {
                status: 400,
                message: error.to_string(),
            });
        }

        let choice = body["choices"][0]
            .as_object()
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "No choices in response".to_string(),
            })?;

        let content = choice
            .get("message")
            .and_then(|m| m["content"].as_str())
            .map(|s| s.to_string());

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .map(FinishReason::from_provider)
            .unwrap_or(FinishReason::Stop);

        let usage = body["usage"].as_object().map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(LlmResponse {
            content,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let operation = || async {
            let url = format!("{}/models", self.base_url);
            let response = self
                .client
                .client()
                .get(&url)
                .headers(self.create_headers()?)
                .timeout(self.client.request_timeout())
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(parse_http_error(status, &body, None));
            }

            let body: Value = response.json().await.map_err(|e| LlmError::InvalidResponse {
                message: format!("Failed to parse models response: {}", e),
            })?;

            Self::parse_models(&body)
        };

        execute_with_retry(operation, &self.retry_config).await
    }

    async fn generate(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_request_body(messages, system, model, config, false)?;

        let operation = || async {
            let response = self.post_chat(&body, model, false).await?;
            let body: Value = response.json().await.map_err(|e| LlmError::InvalidResponse {
                message: format!("Failed to parse generation response: {}", e),
            })?;
            Self::parse_completion(&body)
        };

        execute_with_retry(operation, &self.retry_config).await
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        config: Option<&GenerationConfig>,
    ) -> Result<LlmStream, LlmError> {
        let body = self.build_request_body(messages, system, model, config, true)?;

        // Only the request itself is retried; a stream that breaks midway is not replayed
        let response =
            execute_with_retry(|| self.post_chat(&body, model, true), &self.retry_config).await?;

        let state = (
            response.bytes_stream(),
            ChatCompletionDecoder::new(),
            VecDeque::<StreamPart>::new(),
            false,
        );

        let stream = futures::stream::unfold(
            state,
            |(mut bytes, mut decoder, mut pending, mut ended)| async move {
                loop {
                    if let Some(part) = pending.pop_front() {
                        return Some((Ok(part), (bytes, decoder, pending, ended)));
                    }
                    if ended {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            ended = true;
                            return Some((Err(LlmError::Network(e)), (bytes, decoder, pending, ended)));
                        }
                        None => {
                            ended = true;
                            pending.extend(decoder.finish());
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
