//! `/sessions/:projectId` — `spec.md` §4.7.3.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use oc_core::model::SessionStatus;
use tracing::debug;

use crate::errors::WsCloseError;
use crate::AppState;

pub async fn handler(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let cookie_header = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let user_id = state.auth.resolve_user(cookie_header.as_deref()).await;
    let Some(user_id) = user_id else {
        return crate::ws::reject(ws, WsCloseError::Unauthorized);
    };

    let project = state.store.get_project(&project_id).await;
    let accessible = project.as_ref().is_some_and(|p| p.accessible_by(&user_id));
    if !accessible {
        return crate::ws::reject(ws, WsCloseError::AccessDenied);
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, project_id, user_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, project_id: String, user_id: String) {
    let (mut rx, _subscription) = state.broadcaster.subscribe(format!("sessions:{project_id}"));

    if send_sessions(&mut socket, &state, &project_id, &user_id).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            notified = rx.recv() => {
                if notified.is_none() {
                    break;
                }
                if send_sessions(&mut socket, &state, &project_id, &user_id).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!(project_id, "sessions socket closed");
}

async fn send_sessions(
    socket: &mut WebSocket,
    state: &AppState,
    project_id: &str,
    user_id: &str,
) -> Result<(), axum::Error> {
    let project = state.store.get_project(project_id).await;
    let shared = project.as_ref().is_some_and(|p| p.shared);

    let sessions: Vec<_> = state
        .store
        .list_project_sessions(project_id)
        .await
        .into_iter()
        .filter(|s| {
            matches!(
                s.status,
                SessionStatus::Running | SessionStatus::Pending | SessionStatus::Starting
            )
        })
        .filter(|s| shared || s.owner_user_id == user_id)
        .collect();

    let json = serde_json::to_string(&sessions).unwrap_or_else(|_| "[]".to_string());
    socket.send(Message::Text(json)).await
}
