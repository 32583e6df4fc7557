//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::kernel::engine::SubmitError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input; never enqueued.
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::InvalidPriority(_)
            | SubmitError::InvalidParams(_)
            | SubmitError::UnknownAccount(_) => ApiError::Validation(err.to_string()),
            SubmitError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Internal(e) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_errors_map_to_validation() {
        let err: ApiError = SubmitError::InvalidPriority(42).into();
        assert!(matches!(err, ApiError::Validation(_)));

        let err: ApiError = SubmitError::InvalidParams("missing field".into()).into();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
