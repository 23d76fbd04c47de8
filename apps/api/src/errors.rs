use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm_client::LlmError;
use crate::schema::ValidationErrors;
use crate::session::SaveError;
use crate::store::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SaveError> for AppError {
    fn from(e: SaveError) -> Self {
        match e {
            SaveError::Validation(v) => AppError::Validation(v),
            SaveError::Rejected(s) => AppError::Store(s),
            SaveError::IdentityUnavailable => AppError::Unavailable(e.to_string()),
            SaveError::Closed => AppError::Internal(anyhow::anyhow!(e)),
        }
    }
}

fn store_status(e: &StoreError) -> (StatusCode, &'static str) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::NotAList(_) => (StatusCode::BAD_REQUEST, "NOT_A_LIST"),
        StoreError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "STORE_TIMEOUT"),
        StoreError::Network(_) | StoreError::Rejected { .. } | StoreError::Serialization(_) => {
            (StatusCode::BAD_GATEWAY, "STORE_ERROR")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut fields: Option<Value> = None;
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation(errors) => {
                fields = serde_json::to_value(errors).ok();
                (
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    "Some fields need attention".to_string(),
                )
            }
            AppError::Store(e) => {
                let (status, code) = store_status(e);
                if status.is_server_error() {
                    tracing::error!("Store error: {e}");
                }
                (status, code, e.to_string())
            }
            AppError::Llm(e) => {
                tracing::error!("LLM error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Unavailable: {msg}");
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(fields) = fields {
            error["fields"] = fields;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
