//! HTTP API (task delegation surface) — `spec.md` §6.1.

pub mod github;
pub mod tasks;

use axum::http::HeaderMap;

use crate::errors::ApiError;
use crate::AppState;

/// Bearer-token auth shared by every handler under this surface.
pub fn require_bearer(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    if state.config.api_keys.iter().any(|k| k == token) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub(crate) fn status_from_query(raw: Option<&str>) -> Result<Option<oc_core::model::TaskStatus>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => match s {
            "todo" => Ok(Some(oc_core::model::TaskStatus::Todo)),
            "doing" => Ok(Some(oc_core::model::TaskStatus::Doing)),
            "done" => Ok(Some(oc_core::model::TaskStatus::Done)),
            "canceled" => Ok(Some(oc_core::model::TaskStatus::Canceled)),
            other => Err(ApiError::InvalidInput(format!("unknown status: {other}"))),
        },
    }
}
