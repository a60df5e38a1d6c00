//! `GET|POST /api/tasks`, `GET /api/tasks/:id` — `spec.md` §6.1.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use oc_core::model::{Execution, ExecutionStatus, Task, TaskStatus};

use crate::errors::ApiError;
use crate::http::{require_bearer, status_from_query};
use crate::session_service::StartOptions;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub tasks: Vec<Task>,
    pub pagination: Pagination,
}

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    require_bearer(&headers, &state)?;

    let status = status_from_query(query.status.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let page = state.store.list_tasks(status, limit, offset).await;
    let has_more = offset + page.tasks.len() < page.total;

    Ok(Json(ListResponse {
        tasks: page.tasks,
        pagination: Pagination {
            total: page.total,
            limit,
            offset,
            has_more,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub body: String,
    #[serde(rename = "agentId")]
    pub agent_id: Option<String>,
    pub repository: Option<String>,
    #[serde(rename = "mountPoint")]
    #[allow(dead_code)]
    pub mount_point: Option<String>,
}

#[derive(Serialize)]
pub struct ExecutionView {
    pub id: String,
    pub status: ExecutionStatus,
}

#[derive(Serialize)]
pub struct CreateTaskResponse {
    pub task: Task,
    pub execution: Option<ExecutionView>,
}

const KNOWN_AGENT_IDS: &[&str] = &["claude", "codex", "cursor"];

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(axum::http::StatusCode, Json<CreateTaskResponse>), ApiError> {
    require_bearer(&headers, &state)?;

    if request.body.trim().is_empty() {
        return Err(ApiError::InvalidInput("body must not be empty".to_string()));
    }
    if let Some(agent_id) = &request.agent_id {
        if !KNOWN_AGENT_IDS.contains(&agent_id.as_str()) {
            return Err(ApiError::InvalidInput(format!("unknown agentId: {agent_id}")));
        }
    }

    // When `repository` is supplied, the cloned tree becomes the agent's
    // `/workspace` (`spec.md` §6.1) — the clone path is always under the
    // configured workspace root, so it reduces to a relative suffix.
    let workspace_suffix = if let Some(repository) = &request.repository {
        let repo_dir = state
            .git
            .clone_or_pull(repository)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let suffix = repo_dir
            .strip_prefix(&state.config.workspace_root)
            .unwrap_or(&repo_dir)
            .to_string_lossy()
            .into_owned();
        Some(suffix)
    } else {
        None
    };

    let now = chrono::Utc::now();
    let task_id = uuid::Uuid::new_v4().to_string();
    let status = if request.agent_id.is_some() {
        TaskStatus::Doing
    } else {
        TaskStatus::Todo
    };

    let task = Task {
        id: task_id.clone(),
        body: request.body,
        agent_id: request.agent_id.clone(),
        repository: request.repository.clone(),
        status,
        created_at: now,
        updated_at: now,
    };
    state.store.put_task(task.clone()).await;

    let execution = if let Some(agent_id) = &request.agent_id {
        let execution = Execution {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            status: ExecutionStatus::Pending,
        };
        state.store.put_execution(execution.clone()).await;

        // Enqueuing an execution means an agent container must actually
        // run the task; back it with a session the same way an
        // interactive terminal session is backed (`spec.md` §4.3).
        let session_id = uuid::Uuid::new_v4().to_string();
        state
            .store
            .put_session(oc_core::model::TerminalSession {
                id: session_id.clone(),
                name: format!("task-{task_id}"),
                owner_user_id: "api".to_string(),
                project_id: None,
                parent_id: None,
                relation_type: None,
                status: oc_core::model::SessionStatus::Pending,
                container_name: None,
                created_at: now,
                updated_at: now,
            })
            .await;

        let image = format!("oc-agent-{agent_id}:latest");
        let options = StartOptions {
            reset: false,
            workspace_suffix: workspace_suffix.as_deref(),
            git_branch: None,
        };
        if let Err(e) = state.sessions.start("api", &session_id, &image, options).await {
            tracing::warn!(task_id, "failed to start agent session: {e}");
        }

        Some(ExecutionView {
            id: execution.id,
            status: execution.status,
        })
    } else {
        None
    };

    let response = CreateTaskResponse { task, execution };
    let status_code = if response.execution.is_some() {
        axum::http::StatusCode::CREATED
    } else {
        axum::http::StatusCode::OK
    };
    Ok((status_code, Json(response)))
}

#[derive(Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub latest_execution: Option<Execution>,
}

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TaskDetailResponse>, ApiError> {
    require_bearer(&headers, &state)?;

    let task = state.store.get_task(&id).await.ok_or(ApiError::NotFound)?;
    let latest_execution = state.store.latest_execution(&id).await;

    Ok(Json(TaskDetailResponse { task, latest_execution }))
}
