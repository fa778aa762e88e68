use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tts_core::{CombineError, SynthesisError};

/// Body of every 5xx response; upstream detail only goes to the log
pub const GENERIC_FAILURE: &str = "An error occurred while processing audio";

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<CombineError> for ApiError {
    fn from(err: CombineError) -> Self {
        match err {
            CombineError::Synthesis {
                source: SynthesisError::MissingApiKey,
                ..
            } => ApiError::Configuration(SynthesisError::MissingApiKey.to_string()),
            e @ CombineError::Synthesis { .. } => ApiError::Upstream(e.to_string()),
            e => ApiError::Processing(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Configuration(_) | ApiError::Upstream(_) | ApiError::Processing(_) => {
                tracing::error!("Error processing audio: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_string())
            }
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
