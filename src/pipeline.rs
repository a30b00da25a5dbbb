//! Per-request orchestration: normalize, summarize, select context, respond

use crate::chat::{
    normalize, ChatMessage, ChatMode, ChatRequest, DesignScheme, FileMap, ModelDefaults,
    SelectedAgent, SupabaseState,
};
use crate::config::PipelineConfig;
use crate::context::{
    BatchSummarizer, ContextFileSet, ContextSelector, LlmContextSelector, SummaryCache,
};
use crate::llm::{CumulativeUsage, FinishReason, Message, ResolvedModel};
use crate::stream::{
    trim_to_summary, Annotation, ContinuationController, ModelHint, Phase, ProgressEmitter,
    SystemPromptBuilder, TurnOutcome, TurnState,
};
use crate::utils::errors::KaiError;
use crate::utils::path::relative_to_root;
use crate::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A chat request after normalization
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub messages: Vec<ChatMessage>,
    /// Requested model id
    pub model: String,
    /// Provider name as the client spelled it
    pub provider: String,
    pub files: FileMap,
    pub prompt_id: Option<String>,
    pub context_optimization: bool,
    pub chat_mode: ChatMode,
    pub design_scheme: Option<DesignScheme>,
    pub supabase: Option<SupabaseState>,
    pub selected_agent: Option<SelectedAgent>,
}

impl PipelineRequest {
    /// Normalize the messages of a client request
    pub fn from_chat(request: ChatRequest, defaults: &ModelDefaults) -> Self {
        let conversation = normalize(request.messages, defaults);
        Self {
            messages: conversation.messages,
            model: conversation.model,
            provider: conversation.provider,
            files: request.files,
            prompt_id: request.prompt_id,
            context_optimization: request.context_optimization,
            chat_mode: request.chat_mode,
            design_scheme: request.design_scheme,
            supabase: request.supabase,
            selected_agent: request.selected_agent,
        }
    }

    fn optimizes_context(&self) -> bool {
        self.context_optimization && !self.files.is_empty()
    }
}

/// Output of the summary and context phases
#[derive(Debug, Default)]
struct PreparedContext {
    summary: String,
    chat_id: Option<String>,
    files: ContextFileSet,
}

/// Runs one request end to end, writing everything through the emitter
pub struct ChatPipeline {
    settings: PipelineConfig,
    cache: Arc<dyn SummaryCache>,
    model: ResolvedModel,
    selector: Arc<dyn ContextSelector>,
}

impl ChatPipeline {
    pub fn new(settings: PipelineConfig, cache: Arc<dyn SummaryCache>, model: ResolvedModel) -> Self {
        let selector = Arc::new(LlmContextSelector::new(
            model.clone(),
            settings.project_root.clone(),
            settings.max_context_files,
        ));
        Self {
            settings,
            cache,
            model,
            selector,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn ContextSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Run the request. Failures after this point are reported in-band;
    /// only a disconnected client is returned as an error.
    pub async fn run(&self, request: PipelineRequest, emitter: &mut ProgressEmitter) -> Result<()> {
        let mut usage = CumulativeUsage::new();

        let result = match self.run_turn(&request, emitter, &mut usage).await {
            Ok(outcome) => self.finish_turn(&outcome, emitter, usage).await,
            Err(e @ KaiError::Cancelled { .. }) => Err(e),
            Err(e) => {
                error!("Chat request failed [{}]: {}", e.category(), e);
                self.report_failure(&e.to_string(), emitter, usage).await
            }
        };

        match result {
            Ok(()) => emitter.close().await,
            Err(e) => {
                warn!("Stream ended early: {}", e);
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        request: &PipelineRequest,
        emitter: &mut ProgressEmitter,
        usage: &mut CumulativeUsage,
    ) -> Result<TurnOutcome> {
        info!(
            "Chat request: {} messages, {} files, model '{}' via {}",
            request.messages.len(),
            request.files.len(),
            self.model.model_id(),
            self.model.provider_name()
        );

        let prepared = if request.optimizes_context() {
            self.prepare_context(request, emitter, usage).await?
        } else {
            PreparedContext::default()
        };

        let builder = SystemPromptBuilder::new(
            &self.settings.project_root,
            request.chat_mode,
            request.context_optimization,
        )
        .context_files(&prepared.files)
        .summary(&prepared.summary)
        .files(&request.files)
        .agent(request.selected_agent.as_ref())
        .design_scheme(request.design_scheme.as_ref())
        .supabase(request.supabase.as_ref());
        let system = builder.build();

        let trims = request.chat_mode == ChatMode::Build
            && request.context_optimization
            && !prepared.summary.trim().is_empty();
        let messages: Vec<Message> = if trims {
            trim_to_summary(&request.messages, prepared.chat_id.as_deref())
                .iter()
                .map(ChatMessage::to_llm_message)
                .collect()
        } else {
            request.messages.iter().map(ChatMessage::to_llm_message).collect()
        };

        emitter.begin(Phase::Response, "Generating Response").await?;

        let controller = ContinuationController::new(
            self.model.clone(),
            ModelHint {
                model: self.model.model_id().to_string(),
                provider: request.provider.clone(),
            },
            self.settings.max_response_segments,
        )
        .with_max_tokens(self.settings.max_tokens);

        controller.run(&system, messages, emitter, usage).await
    }

    async fn prepare_context(
        &self,
        request: &PipelineRequest,
        emitter: &mut ProgressEmitter,
        usage: &mut CumulativeUsage,
    ) -> Result<PreparedContext> {
        emitter.begin(Phase::Summary, "Analysing Request").await?;

        // The summary covers the history before the message being answered
        let history = match request.messages.split_last() {
            Some((_, history)) => history,
            None => &[][..],
        };
        let cache_key = request
            .prompt_id
            .as_deref()
            .unwrap_or(&self.settings.default_prompt_id);

        let outcome = BatchSummarizer::new(
            self.cache.clone(),
            self.model.clone(),
            self.settings.summary_batch_size,
        )
        .with_max_tokens(self.settings.max_tokens)
        .summarize(history, cache_key, usage)
        .await?;

        emitter.complete(Phase::Summary, "Analysis Complete").await?;
        if let Some(chat_id) = outcome.chat_id.as_ref().filter(|_| !outcome.summary.is_empty()) {
            emitter
                .annotate(Annotation::ChatSummary {
                    summary: outcome.summary.clone(),
                    chat_id: chat_id.clone(),
                })
                .await?;
        }

        emitter.begin(Phase::Context, "Determining Files to Read").await?;
        let files = self
            .selector
            .select(&request.messages, &request.files, &outcome.summary, usage)
            .await?;
        emitter.complete(Phase::Context, "Code Files Selected").await?;

        emitter
            .annotate(Annotation::CodeContext {
                files: files
                    .keys()
                    .map(|path| relative_to_root(path, &self.settings.project_root))
                    .collect(),
            })
            .await?;

        Ok(PreparedContext {
            summary: outcome.summary,
            chat_id: outcome.chat_id,
            files,
        })
    }

    async fn finish_turn(
        &self,
        outcome: &TurnOutcome,
        emitter: &mut ProgressEmitter,
        usage: CumulativeUsage,
    ) -> Result<()> {
        info!(
            "Response finished after {} segment(s): {} ({} tokens)",
            outcome.segments, outcome.finish_reason, usage.total_tokens
        );

        match outcome.state {
            TurnState::Failed => emitter.fail(Phase::Response, "Response Generation Failed").await?,
            _ => emitter.complete(Phase::Response, "Response Generated").await?,
        }

        emitter.annotate(Annotation::Usage { value: usage }).await?;
        emitter.finish(outcome.finish_reason, usage).await
    }

    async fn report_failure(
        &self,
        message: &str,
        emitter: &mut ProgressEmitter,
        usage: CumulativeUsage,
    ) -> Result<()> {
        emitter.fail_open(message).await?;
        emitter.error(message).await?;
        emitter.annotate(Annotation::Usage { value: usage }).await?;
        emitter.finish(FinishReason::Error, usage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::FileEntry;
    use crate::context::{FixedContextSelector, MemorySummaryCache};
    use crate::llm::mock::MockProvider;
    use crate::llm::{LlmError, MessageRole, ModelInfo, StreamPart};
    use crate::stream::emitter::tests::{drain, progress};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn resolved(provider: Arc<MockProvider>) -> ResolvedModel {
        ResolvedModel {
            provider,
            model: ModelInfo {
                id: "mock-model".to_string(),
                name: "Mock".to_string(),
                context_length: None,
                max_output_tokens: None,
            },
        }
    }

    fn cache() -> Arc<MemorySummaryCache> {
        Arc::new(MemorySummaryCache::new(Duration::from_secs(600)))
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new("m1", MessageRole::User, "[Model: mock-model]\n\n[Provider: Mock]\n\nBuild a todo app"),
            ChatMessage::new("m2", MessageRole::Assistant, "Done."),
            ChatMessage::new("m3", MessageRole::User, "[Model: mock-model]\n\n[Provider: Mock]\n\nAdd dark mode"),
        ]
    }

    fn files() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "/home/project/src/App.tsx".to_string(),
            Some(FileEntry::File {
                content: "export default function App() {}".to_string(),
                is_binary: false,
                is_locked: false,
            }),
        );
        files
    }

    fn request(context_optimization: bool) -> PipelineRequest {
        let defaults = ModelDefaults {
            model: "default".to_string(),
            provider: "openrouter".to_string(),
        };
        PipelineRequest::from_chat(
            ChatRequest {
                messages: conversation(),
                files: files(),
                prompt_id: None,
                context_optimization,
                chat_mode: ChatMode::Build,
                design_scheme: None,
                supabase: None,
                selected_agent: None,
            },
            &defaults,
        )
    }

    async fn run(pipeline: &ChatPipeline, request: PipelineRequest) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(256);
        let mut emitter = ProgressEmitter::new(tx);
        pipeline.run(request, &mut emitter).await.unwrap();
        drop(emitter);
        drain(&mut rx)
    }

    fn annotations(lines: &[String]) -> Vec<Value> {
        lines
            .iter()
            .filter_map(|line| line.strip_prefix("8:"))
            .filter_map(|json| serde_json::from_str::<Vec<Value>>(json).ok())
            .flatten()
            .collect()
    }

    fn finish(lines: &[String]) -> Value {
        let line = lines.iter().find(|l| l.starts_with("d:")).unwrap();
        serde_json::from_str(&line[2..]).unwrap()
    }

    #[tokio::test]
    async fn test_short_conversation_without_optimization() {
        let provider = Arc::new(MockProvider::new());
        provider.push_segment("Sure.", FinishReason::Stop, 4);
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(false)).await;

        assert_eq!(provider.generate_calls(), 0);
        assert_eq!(provider.stream_calls(), 1);

        let progress = progress(&lines);
        assert_eq!(progress.len(), 2);
        assert!(progress.iter().all(|p| p["label"] == "response"));
        assert_eq!(progress[0]["status"], "in-progress");
        assert_eq!(progress[1]["status"], "complete");

        // Hints are stripped before the backend sees the messages
        let sent = &provider.stream_log()[0];
        assert_eq!(sent.messages.len(), 3);
        assert_eq!(sent.messages[2].content, "Add dark mode");
        assert!(!sent.system.as_deref().unwrap().contains("CONTEXT BUFFER"));

        assert!(lines.contains(&"0:\"Sure.\"".to_string()));
        assert_eq!(finish(&lines)["finishReason"], "stop");

        // The response phase closes before usage, and the finish event ends the stream
        let completed = lines
            .iter()
            .position(|l| l.starts_with("2:") && l.contains("\"complete\""))
            .unwrap();
        let usage = lines.iter().position(|l| l.contains("\"type\":\"usage\"")).unwrap();
        assert!(completed < usage);
        assert!(lines.last().unwrap().starts_with("d:"));
    }

    #[tokio::test]
    async fn test_optimized_turn_emits_phases_in_order() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response("# Project Overview\nTodo app", 10);
        provider.push_response(
            "<updateContextBuffer><includeFile path=\"src/App.tsx\"/></updateContextBuffer>",
            6,
        );
        provider.push_segment("Here you go", FinishReason::Stop, 4);
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(true)).await;

        assert_eq!(provider.generate_calls(), 2);
        let progress = progress(&lines);
        let labels: Vec<&str> = progress.iter().map(|p| p["label"].as_str().unwrap()).collect();
        assert_eq!(
            labels,
            vec!["summary", "summary", "context", "context", "response", "response"]
        );
        let orders: Vec<u64> = progress.iter().map(|p| p["order"].as_u64().unwrap()).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));

        let annotations = annotations(&lines);
        assert_eq!(annotations[0]["type"], "chatSummary");
        assert_eq!(annotations[0]["chatId"], "m2");
        assert_eq!(annotations[1]["type"], "codeContext");
        assert_eq!(annotations[1]["files"][0], "src/App.tsx");
        assert_eq!(annotations[2]["type"], "usage");
        assert_eq!(annotations[2]["value"]["totalTokens"], 20);
        assert_eq!(finish(&lines)["usage"]["totalTokens"], 20);

        // Build mode: summary and buffer in the prompt, history trimmed after m2
        let sent = &provider.stream_log()[0];
        let system = sent.system.as_deref().unwrap();
        assert!(system.contains("CHAT SUMMARY"));
        assert!(system.contains("filePath=\"src/App.tsx\""));
        assert_eq!(sent.messages.len(), 1);
        assert_eq!(sent.messages[0].content, "Add dark mode");
    }

    #[tokio::test]
    async fn test_length_stop_continues_within_turn() {
        let provider = Arc::new(MockProvider::new());
        provider.push_segment("first half, ", FinishReason::Length, 3);
        provider.push_segment("second half", FinishReason::Stop, 3);
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(false)).await;

        assert_eq!(provider.stream_calls(), 2);
        let text: String = lines
            .iter()
            .filter_map(|l| l.strip_prefix("0:"))
            .map(|json| serde_json::from_str::<String>(json).unwrap())
            .collect();
        assert_eq!(text, "first half, second half");
        assert_eq!(finish(&lines)["finishReason"], "stop");
        assert_eq!(finish(&lines)["usage"]["totalTokens"], 6);
        assert!(!lines.iter().any(|l| l.starts_with("3:")));
    }

    #[tokio::test]
    async fn test_segment_limit_is_reported_once() {
        let provider = Arc::new(MockProvider::new());
        for _ in 0..3 {
            provider.push_segment("more", FinishReason::Length, 1);
        }
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(false)).await;

        assert_eq!(provider.stream_calls(), 2);
        assert_eq!(lines.iter().filter(|l| l.starts_with("3:")).count(), 1);

        let progress = progress(&lines);
        let errors: Vec<&Value> = progress.iter().filter(|p| p["status"] == "error").collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["label"], "continuation");
        let response_done = progress
            .iter()
            .any(|p| p["label"] == "response" && p["status"] == "complete");
        assert!(response_done);
        assert_eq!(finish(&lines)["finishReason"], "length");
    }

    #[tokio::test]
    async fn test_follow_up_uses_cached_summary() {
        let provider = Arc::new(MockProvider::new());
        let shared = cache();
        let pipeline = ChatPipeline::new(PipelineConfig::default(), shared, resolved(provider.clone()))
            .with_selector(Arc::new(FixedContextSelector::new("/home/project")));

        run(&pipeline, request(true)).await;
        assert_eq!(provider.generate_calls(), 1);

        let lines = run(&pipeline, request(true)).await;
        assert_eq!(provider.generate_calls(), 1);

        let annotations = annotations(&lines);
        assert_eq!(annotations[0]["type"], "chatSummary");
        assert_eq!(annotations[0]["summary"], "summary 1");
    }

    #[tokio::test]
    async fn test_usage_sums_every_backend_call() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response("summary", 100);
        provider.push_response("<updateContextBuffer></updateContextBuffer>", 20);
        provider.push_segment("a", FinishReason::Length, 7);
        provider.push_segment("b", FinishReason::Stop, 5);
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(true)).await;

        let usage = &finish(&lines)["usage"];
        assert_eq!(usage["totalTokens"], 132);
        assert_eq!(
            usage["promptTokens"].as_u64().unwrap() + usage["completionTokens"].as_u64().unwrap(),
            132
        );
    }

    #[tokio::test]
    async fn test_failure_after_stream_start_is_in_band() {
        let provider = Arc::new(MockProvider::new());
        provider.push_error(LlmError::RequestFailed {
            status: 500,
            message: "summarizer down".to_string(),
        });
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(true)).await;

        assert_eq!(provider.stream_calls(), 0);
        let errors: Vec<&String> = lines.iter().filter(|l| l.starts_with("3:")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("summarizer down"));

        let progress = progress(&lines);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[1]["label"], "summary");
        assert_eq!(progress[1]["status"], "error");
        assert_eq!(finish(&lines)["finishReason"], "error");
    }

    #[tokio::test]
    async fn test_mid_stream_error_fails_response_phase() {
        let provider = Arc::new(MockProvider::new());
        provider.push_stream(vec![StreamPart::Error("rate limited".to_string())]);
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let lines = run(&pipeline, request(false)).await;

        assert_eq!(lines.iter().filter(|l| l.starts_with("3:")).count(), 1);
        let progress = progress(&lines);
        let last = progress.last().unwrap();
        assert_eq!(last["label"], "response");
        assert_eq!(last["status"], "error");
    }

    #[tokio::test]
    async fn test_disconnected_client_stops_pipeline() {
        let provider = Arc::new(MockProvider::new());
        let pipeline = ChatPipeline::new(PipelineConfig::default(), cache(), resolved(provider.clone()));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut emitter = ProgressEmitter::new(tx);
        let err = pipeline.run(request(false), &mut emitter).await.unwrap_err();

        assert!(matches!(err, KaiError::Cancelled { .. }));
        assert_eq!(provider.stream_calls(), 0);
    }
}
