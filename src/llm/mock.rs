//! Scripted in-memory backend for tests

use super::{
    FinishReason, GenerationConfig, LlmError, LlmProvider, LlmResponse, LlmStream, Message,
    ModelInfo, StreamPart, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded backend call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub model: String,
}

/// Backend that replays scripted responses and counts calls
pub struct MockProvider {
    models: Vec<ModelInfo>,
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    streams: Mutex<VecDeque<Vec<StreamPart>>>,
    generate_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    generate_log: Mutex<Vec<RecordedCall>>,
    stream_log: Mutex<Vec<RecordedCall>>,
    latency: Duration,
}

pub fn usage(total: u32) -> TokenUsage {
    TokenUsage {
        prompt_tokens: total / 2,
        completion_tokens: total - total / 2,
        total_tokens: total,
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            models: vec![model("mock-model")],
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            generate_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            generate_log: Mutex::new(Vec::new()),
            stream_log: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids.iter().map(|id| model(id)).collect();
        self
    }

    /// Delay every non-streaming call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a non-streaming response
    pub fn push_response(&self, text: &str, total_tokens: u32) {
        self.responses.lock().unwrap().push_back(Ok(LlmResponse {
            content: Some(text.to_string()),
            finish_reason: FinishReason::Stop,
            usage: Some(usage(total_tokens)),
        }));
    }

    /// Queue a non-streaming failure
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Queue the parts of one streaming call
    pub fn push_stream(&self, parts: Vec<StreamPart>) {
        self.streams.lock().unwrap().push_back(parts);
    }

    /// Queue a text segment ending with `finish_reason`
    pub fn push_segment(&self, text: &str, finish_reason: FinishReason, total_tokens: u32) {
        self.push_stream(vec![
            StreamPart::text(text),
            StreamPart::finish(finish_reason, Some(usage(total_tokens))),
        ]);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn generate_log(&self) -> Vec<RecordedCall> {
        self.generate_log.lock().unwrap().clone()
    }

    pub fn stream_log(&self) -> Vec<RecordedCall> {
        self.stream_log.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn model(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: id.to_string(),
        context_length: Some(128_000),
        max_output_tokens: Some(8000),
    }
}

fn record(messages: &[Message], system: Option<&str>, model: &str) -> RecordedCall {
    RecordedCall {
        messages: messages.to_vec(),
        system: system.map(|s| s.to_string()),
        model: model.to_string(),
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        _config: Option<&GenerationConfig>,
    ) -> Result<LlmResponse, LlmError> {
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generate_log
            .lock()
            .unwrap()
            .push(record(messages, system, model));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(LlmResponse {
                content: Some(format!("summary {}", call + 1)),
                finish_reason: FinishReason::Stop,
                usage: Some(usage(10)),
            })
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        system: Option<&str>,
        model: &str,
        _config: Option<&GenerationConfig>,
    ) -> Result<LlmStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_log
            .lock()
            .unwrap()
            .push(record(messages, system, model));

        let parts = self.streams.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![
                StreamPart::text("ok"),
                StreamPart::finish(FinishReason::Stop, Some(usage(2))),
            ]
        });

        Ok(Box::pin(futures::stream::iter(parts.into_iter().map(Ok))))
    }
}
