//! HTTP error mapping for specid-proxy

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Error raised while handling a classification request
    #[error(transparent)]
    Common(#[from] specid_common::Error),
}

impl ApiError {
    /// Status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        use specid_common::Error as E;
        match self {
            ApiError::Common(E::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            ApiError::Common(E::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Common(E::UnsupportedMediaType(_)) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE")
            }
            ApiError::Common(E::UpstreamUnavailable(_)) => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            ApiError::Common(E::UpstreamMalformed(_)) => (StatusCode::BAD_GATEWAY, "UPSTREAM_MALFORMED"),
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
