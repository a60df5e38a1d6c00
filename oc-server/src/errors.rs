//! Server-level error taxonomy (`spec.md` §7). `ApiError` maps to HTTP
//! status codes for the §6.1 surface; `WsCloseError` maps to WebSocket
//! close codes for the §4.7 proxy endpoints. Both are `thiserror` enums
//! following the teacher's per-subsystem error enum style; `anyhow` is
//! reserved for composition-root setup failures only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}

impl From<oc_core::errors::InvalidInputError> for ApiError {
    fn from(e: oc_core::errors::InvalidInputError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

/// WebSocket close reasons, `spec.md` §7: 1008 for auth/resource
/// failures, 1011 for upstream failures, 1009 for an oversized
/// pre-connect buffer.
#[derive(Error, Debug, Clone, Copy)]
pub enum WsCloseError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("session not found, not running, or access denied")]
    AccessDenied,
    #[error("could not connect to terminal")]
    UpstreamUnavailable,
    #[error("message too big")]
    MessageTooBig,
}

impl WsCloseError {
    pub fn code(self) -> u16 {
        match self {
            WsCloseError::Unauthorized | WsCloseError::AccessDenied => 1008,
            WsCloseError::UpstreamUnavailable => 1011,
            WsCloseError::MessageTooBig => 1009,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_match_spec() {
        assert_eq!(WsCloseError::Unauthorized.code(), 1008);
        assert_eq!(WsCloseError::AccessDenied.code(), 1008);
        assert_eq!(WsCloseError::UpstreamUnavailable.code(), 1011);
        assert_eq!(WsCloseError::MessageTooBig.code(), 1009);
    }
}
