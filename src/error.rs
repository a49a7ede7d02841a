use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The losing side of an acceptance race, or a transition from a state
    /// that no longer allows it. Distinct from NotFound so clients can show
    /// "someone else got it" rather than "order vanished".
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {reasons:?}")]
    Forbidden { reasons: Vec<String> },

    #[error("push channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Forbidden { reasons } => (
                StatusCode::FORBIDDEN,
                json!({ "error": "driver not eligible", "reasons": reasons }),
            ),
            AppError::ChannelUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}
