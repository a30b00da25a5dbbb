//! HTTP handlers for chat streaming and model listing

use super::error::ApiError;
use super::state::AppState;
use crate::chat::ChatRequest;
use crate::llm::{resolve_model, ModelInfo, ResolvedModel};
use crate::pipeline::{ChatPipeline, PipelineRequest};
use crate::stream::ProgressEmitter;
use crate::utils::config::{provider_settings, CookieCredentials};
use crate::utils::errors::KaiError;
use crate::Result;
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE},
        HeaderMap, HeaderName,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lines buffered between the pipeline task and the response body
const STREAM_BUFFER: usize = 64;

static DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");

fn cookie_credentials(headers: &HeaderMap) -> CookieCredentials {
    let cookie = headers.get(COOKIE).and_then(|value| value.to_str().ok());
    CookieCredentials::from_cookie_header(cookie)
}

/// Create the backend for `provider` and pick the model, before any byte is streamed
async fn resolve_backend(
    state: &AppState,
    provider: &str,
    model: &str,
    credentials: &CookieCredentials,
) -> Result<ResolvedModel> {
    let settings = provider_settings(&state.config, provider, credentials);
    let backend = state.providers.create_provider(provider, &settings)?;
    resolve_model(backend, model).await
}

/// `POST /api/chat`
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let request: ChatRequest = serde_json::from_slice(&body).map_err(KaiError::from)?;
    if request.messages.is_empty() {
        return Err(KaiError::validation("messages", "At least one message is required").into());
    }

    let request = PipelineRequest::from_chat(request, &state.model_defaults());
    let credentials = cookie_credentials(&headers);
    let model = resolve_backend(&state, &request.provider, &request.model, &credentials).await?;

    info!(
        "Streaming chat with {} via {}",
        model.model_id(),
        model.provider_name()
    );

    let pipeline = ChatPipeline::new(state.config.pipeline.clone(), state.cache.clone(), model);
    let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        let mut emitter = ProgressEmitter::new(tx);
        tokio::select! {
            _ = cancel.cancelled() => info!("Client disconnected, aborting chat request"),
            result = pipeline.run(request, &mut emitter) => {
                if let Err(e) = result {
                    debug!("Chat pipeline stopped: {}", e);
                }
            }
        }
    });

    // The body owns the guard; dropping the body cancels the pipeline
    let stream = ReceiverStream::new(rx).map(move |line| {
        let _ = &guard;
        Ok::<_, Infallible>(line)
    });

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
            (DATA_STREAM_HEADER.clone(), "v1"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<String>,
}

/// `GET /api/models`
pub async fn models_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ModelsQuery>,
) -> std::result::Result<Json<Vec<ModelInfo>>, ApiError> {
    let provider = query
        .provider
        .unwrap_or_else(|| state.config.default_provider.clone());
    let credentials = cookie_credentials(&headers);

    let settings = provider_settings(&state.config, &provider, &credentials);
    let backend = state.providers.create_provider(&provider, &settings)?;
    let models = backend.list_models().await.map_err(KaiError::from)?;

    Ok(Json(models))
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}
