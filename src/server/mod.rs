//! HTTP surface: routes, CORS and the listener

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::{AppState, DefaultProviders, ProviderRegistry};

use crate::Result;
use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use handlers::{chat_handler, healthz, models_handler};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat_handler))
        .route("/api/models", get(models_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C, evicting expired summaries in the background
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let cache = state.cache.clone();
    let interval = state.config.pipeline.summary_ttl().max(Duration::from_secs(1));
    let eviction = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = cache.evict_expired().await;
            if evicted > 0 {
                debug!("Evicted {} expired summaries", evicted);
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("kai-relay listening on {}", listener.local_addr()?);

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    eviction.abort();
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
