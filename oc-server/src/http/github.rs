//! `POST /api/github/verify-access` — `spec.md` §6.1.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::http::require_bearer;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyAccessRequest {
    pub repository: String,
}

#[derive(Serialize)]
pub struct VerifyAccessResponse {
    #[serde(rename = "hasAccess")]
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn verify_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyAccessRequest>,
) -> Result<Json<VerifyAccessResponse>, ApiError> {
    require_bearer(&headers, &state)?;

    let parts: Vec<&str> = request.repository.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ApiError::InvalidInput(format!(
            "invalid repository reference: {}",
            request.repository
        )));
    }

    let Some(token) = &state.config.github_token else {
        return Ok(Json(VerifyAccessResponse {
            has_access: false,
            repository: Some(request.repository),
            permissions: None,
            error: Some("no GitHub token configured".to_string()),
        }));
    };

    let url = format!("https://api.github.com/repos/{}", request.repository);
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .bearer_auth(token)
        .header("User-Agent", "open-commander")
        .header("Accept", "application/vnd.github+json")
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
            let permissions = body.get("permissions").cloned();
            Ok(Json(VerifyAccessResponse {
                has_access: true,
                repository: Some(request.repository),
                permissions,
                error: None,
            }))
        }
        Ok(resp) => Ok(Json(VerifyAccessResponse {
            has_access: false,
            repository: Some(request.repository),
            permissions: None,
            error: Some(format!("GitHub returned {}", resp.status())),
        })),
        Err(e) => Ok(Json(VerifyAccessResponse {
            has_access: false,
            repository: Some(request.repository),
            permissions: None,
            error: Some(e.to_string()),
        })),
    }
}
