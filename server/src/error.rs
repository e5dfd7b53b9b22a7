use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Tts(#[from] TtsError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Tts(TtsError::MalformedRequest(e)) => {
                (StatusCode::BAD_REQUEST, format!("Invalid request: {e}"))
            }
            ApiError::Tts(TtsError::UnknownVoice(voice)) => {
                tracing::debug!(%voice, "requested voice is not in the catalog");
                (StatusCode::BAD_REQUEST, "Voice not found".to_string())
            }
            ApiError::Tts(e @ TtsError::AssetResolution { .. }) => {
                tracing::warn!("Voice resolution failed: {:#}", anyhow::Error::from(e));
                (StatusCode::BAD_REQUEST, "Voice not found".to_string())
            }
            ApiError::Tts(e @ (TtsError::EngineStart(_) | TtsError::EngineInput(_))) => {
                tracing::error!("TTS error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Error streaming TTS".to_string())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
