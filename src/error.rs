use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Step failed: {0}")]
    Step(String),

    #[error("Timeout while sending UART command: {0}")]
    UartTimeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay operation failed: {0}")]
    Relay(String),

    #[error("Test execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::ExecutionNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Test execution '{}' not found", id),
            ),
            AppError::Setup(msg) => {
                tracing::error!("Setup error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            other => {
                tracing::error!("Internal error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
