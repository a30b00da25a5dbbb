//! Bounded multi-segment response generation
//!
//! A segment that stops at the output length limit is continued by appending
//! the partial answer and a continuation request, up to a fixed number of
//! backend calls per turn.

use super::emitter::ProgressEmitter;
use super::events::Phase;
use crate::llm::prompts::CONTINUE_PROMPT;
use crate::llm::{
    CumulativeUsage, FinishReason, GenerationConfig, Message, ResolvedModel, StreamPart,
    TokenCounter,
};
use crate::Result;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

/// Where the turn is in its segment loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// A backend call is about to be made
    Generating,
    /// The last segment hit the length limit
    Continuing,
    /// A segment finished for any other reason
    Complete,
    /// The length limit was hit on the last allowed segment
    SegmentLimitExceeded,
    /// The backend reported an error mid-stream
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::SegmentLimitExceeded | Self::Failed
        )
    }
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub state: TurnState,
    /// Backend calls made
    pub segments: u32,
    pub finish_reason: FinishReason,
    /// All text forwarded to the client
    pub text: String,
}

#[derive(Debug)]
enum SegmentEnd {
    Finished(FinishReason),
    Failed(String),
}

#[derive(Debug)]
struct Segment {
    text: String,
    end: SegmentEnd,
}

/// Model and provider names echoed into continuation requests
#[derive(Debug, Clone)]
pub struct ModelHint {
    pub model: String,
    pub provider: String,
}

impl ModelHint {
    fn continuation_message(&self) -> String {
        format!(
            "[Model: {}]\n\n[Provider: {}]\n\n{}",
            self.model, self.provider, CONTINUE_PROMPT
        )
    }
}

fn estimate_prompt_tokens(system: &str, messages: &[Message]) -> u32 {
    messages
        .iter()
        .map(|m| TokenCounter::estimate_tokens(&m.content))
        .sum::<u32>()
        + TokenCounter::estimate_tokens(system)
}

/// Drives the response phase for one request
pub struct ContinuationController {
    model: ResolvedModel,
    hint: ModelHint,
    max_segments: u32,
    config: GenerationConfig,
}

impl ContinuationController {
    pub fn new(model: ResolvedModel, hint: ModelHint, max_segments: u32) -> Self {
        Self {
            model,
            hint,
            max_segments: max_segments.max(1),
            config: GenerationConfig::default(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config = GenerationConfig::with_max_tokens(max_tokens);
        self
    }

    /// Stream the response, continuing on length stops until the segment limit
    ///
    /// Emits the continuation phase progress and in-band errors; the caller
    /// owns the response phase and the final usage and finish events.
    pub async fn run(
        &self,
        system: &str,
        mut messages: Vec<Message>,
        emitter: &mut ProgressEmitter,
        usage: &mut CumulativeUsage,
    ) -> Result<TurnOutcome> {
        let mut state = TurnState::Generating;
        let mut segments = 0u32;
        let mut finish_reason = FinishReason::Stop;
        let mut text = String::new();
        let mut last_segment_text = String::new();

        while !state.is_terminal() {
            state = match state {
                TurnState::Generating => {
                    segments += 1;
                    debug!(
                        "Streaming segment {}/{} (~{} prompt tokens)",
                        segments,
                        self.max_segments,
                        estimate_prompt_tokens(system, &messages)
                    );
                    let segment = self.stream_segment(system, &messages, emitter, usage).await?;
                    text.push_str(&segment.text);
                    last_segment_text = segment.text;

                    match segment.end {
                        SegmentEnd::Finished(FinishReason::Length) => {
                            finish_reason = FinishReason::Length;
                            TurnState::Continuing
                        }
                        SegmentEnd::Finished(reason) => {
                            finish_reason = reason;
                            TurnState::Complete
                        }
                        SegmentEnd::Failed(message) => {
                            error!("Backend stream failed: {}", message);
                            emitter.error(&message).await?;
                            finish_reason = FinishReason::Error;
                            TurnState::Failed
                        }
                    }
                }
                TurnState::Continuing if segments >= self.max_segments => {
                    TurnState::SegmentLimitExceeded
                }
                TurnState::Continuing => {
                    info!(
                        "Segment {} stopped at the length limit, continuing",
                        segments
                    );
                    emitter
                        .begin(Phase::Continuation, "Continuing Response")
                        .await?;
                    messages.push(Message::assistant(std::mem::take(
                        &mut last_segment_text,
                    )));
                    messages.push(Message::user(self.hint.continuation_message()));
                    TurnState::Generating
                }
                terminal => terminal,
            };
        }

        match state {
            TurnState::SegmentLimitExceeded => {
                let message = format!(
                    "Cannot continue message: maximum segments of {} reached",
                    self.max_segments
                );
                warn!("{}", message);
                emitter.fail(Phase::Continuation, &message).await?;
                emitter.error(&message).await?;
            }
            TurnState::Failed if segments > 1 => {
                emitter
                    .fail(Phase::Continuation, "Response Continuation Failed")
                    .await?;
            }
            _ if segments > 1 => {
                emitter
                    .complete(Phase::Continuation, "Response Continued")
                    .await?;
            }
            _ => {}
        }

        Ok(TurnOutcome {
            state,
            segments,
            finish_reason,
            text,
        })
    }

    async fn stream_segment(
        &self,
        system: &str,
        messages: &[Message],
        emitter: &mut ProgressEmitter,
        usage: &mut CumulativeUsage,
    ) -> Result<Segment> {
        let mut stream = self
            .model
            .provider
            .generate_stream(messages, Some(system), self.model.model_id(), Some(&self.config))
            .await?;

        let mut text = String::new();

        while let Some(part) = stream.next().await {
            let part = match part {
                Ok(part) => part,
                Err(e) => {
                    return Ok(Segment {
                        text,
                        end: SegmentEnd::Failed(e.to_string()),
                    })
                }
            };

            match part {
                StreamPart::TextDelta(delta) => {
                    emitter.text(&delta).await?;
                    text.push_str(&delta);
                }
                StreamPart::ReasoningDelta(delta) => {
                    emitter.reasoning(&delta).await?;
                }
                StreamPart::Finish {
                    finish_reason,
                    usage: segment_usage,
                } => {
                    usage.record_opt(segment_usage.as_ref());
                    return Ok(Segment {
                        text,
                        end: SegmentEnd::Finished(finish_reason),
                    });
                }
                StreamPart::Error(message) => {
                    return Ok(Segment {
                        text,
                        end: SegmentEnd::Failed(message),
                    })
                }
            }
        }

        debug!("Backend stream ended without a finish part");
        Ok(Segment {
            text,
            end: SegmentEnd::Finished(FinishReason::Stop),
        })
    }
}
