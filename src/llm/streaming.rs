//! Streaming support for model responses

use super::{FinishReason, LlmError, TokenUsage};
use futures::stream::Stream;
use serde::Deserialize;
use std::pin::Pin;

/// One typed part of a streamed generation
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// Incremental answer text
    TextDelta(String),
    /// Incremental reasoning text
    ReasoningDelta(String),
    /// End of the generation
    Finish {
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    },
    /// Backend-reported error inside an otherwise healthy stream
    Error(String),
}

impl StreamPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::TextDelta(text.into())
    }

    pub fn reasoning<S: Into<String>>(text: S) -> Self {
        Self::ReasoningDelta(text.into())
    }

    pub fn finish(finish_reason: FinishReason, usage: Option<TokenUsage>) -> Self {
        Self::Finish {
            finish_reason,
            usage,
        }
    }
}

/// Stream of parts from a model response
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamPart, LlmError>> + Send>>;

/// Server-Sent Events (SSE) parser for streaming responses
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse incoming data and extract complete SSE events
    pub fn parse(&mut self, data: &str) -> Vec<SseEvent> {
        self.buffer.push_str(data);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(event_end) = self.buffer.find("\n\n") {
            let event_data: String = self.buffer.drain(..event_end + 2).collect();
            if let Some(event) = Self::parse_event(&event_data) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_event(&rest)
    }

    fn parse_event(data: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut event_data = String::new();

        for line in data.lines() {
            // Lines starting with ':' are comments (OpenRouter keep-alives)
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some((field, value)) = line.split_once(':') {
                let value = value.strip_prefix(' ').unwrap_or(value);

                match field {
                    "event" => event_type = Some(value.to_string()),
                    "data" => {
                        if !event_data.is_empty() {
                            event_data.push('\n');
                        }
                        event_data.push_str(value);
                    }
                    _ => {}
                }
            }
        }

        if event_data.is_empty() {
            None
        } else {
            Some(SseEvent {
                event_type,
                data: event_data,
            })
        }
    }
}

/// Represents a Server-Sent Event
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Check if this is the end-of-stream marker
    pub fn is_completion(&self) -> bool {
        self.event_type.as_deref() == Some("done") || self.data == "[DONE]"
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Turns the raw bytes of an OpenAI-style `chat/completions` stream into parts
///
/// Bytes may split UTF-8 sequences and SSE events at any point. Exactly one
/// `Finish` part is produced, at `[DONE]` or when the body ends.
#[derive(Debug, Default)]
pub struct ChatCompletionDecoder {
    parser: SseParser,
    pending_bytes: Vec<u8>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl ChatCompletionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamPart> {
        if self.finished {
            return Vec::new();
        }

        self.pending_bytes.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.pending_bytes) {
            Ok(_) => self.pending_bytes.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => e.valid_up_to() + e.error_len().unwrap_or(0),
        };
        let complete: Vec<u8> = self.pending_bytes.drain(..valid_up_to).collect();
        let text = String::from_utf8_lossy(&complete);

        let events = self.parser.parse(&text);
        self.handle_events(events)
    }

    /// Signal the end of the response body
    pub fn finish(&mut self) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        if let Some(event) = self.parser.finish() {
            parts.extend(self.handle_events(vec![event]));
        }
        if !self.finished {
            parts.push(self.finish_part());
        }
        parts
    }

    fn handle_events(&mut self, events: Vec<SseEvent>) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        for event in events {
            if self.finished {
                break;
            }
            if event.is_completion() {
                parts.push(self.finish_part());
                continue;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!("Skipping unparseable stream event: {}", e);
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| error.to_string());
                parts.push(StreamPart::Error(message));
                continue;
            }

            for choice in chunk.choices {
                let reasoning = choice.delta.reasoning.or(choice.delta.reasoning_content);
                if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
                    parts.push(StreamPart::ReasoningDelta(reasoning));
                }
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    parts.push(StreamPart::TextDelta(content));
                }
                if let Some(reason) = choice.finish_reason {
                    self.finish_reason = Some(FinishReason::from_provider(&reason));
                }
            }

            if let Some(usage) = chunk.usage {
                self.usage = Some(TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                });
            }
        }
        parts
    }

    fn finish_part(&mut self) -> StreamPart {
        self.finished = true;
        StreamPart::finish(
            self.finish_reason.clone().unwrap_or(FinishReason::Stop),
            self.usage,
        )
    }
}
