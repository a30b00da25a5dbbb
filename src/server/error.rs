//! Pre-stream error responses

use crate::utils::errors::KaiError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

/// Failure before the data stream starts; rendered as a JSON body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<KaiError> for ApiError {
    fn from(err: KaiError) -> Self {
        if err.is_auth_failure() {
            warn!("Rejected chat request: {}", err);
            Self::new(StatusCode::UNAUTHORIZED, err.to_string())
        } else {
            error!("Chat request failed before streaming [{}]: {}", err.category(), err);
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_text = self.status.canonical_reason().unwrap_or("Error");
        (
            self.status,
            Json(json!({
                "error": true,
                "message": self.message,
                "statusText": status_text,
            })),
        )
            .into_response()
    }
}
