//! `/presence/:projectId` — `spec.md` §4.7.2.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::debug;

use crate::errors::WsCloseError;
use crate::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Heartbeat {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[allow(dead_code)]
        status: Option<String>,
    },
    Leave,
}

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

    ws.on_upgrade(move |socket| handle_socket(socket, state, project_id, user_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, project_id: String, user_id: String) {
    let (mut rx, _subscription) = state.broadcaster.subscribe(format!("presence:{project_id}"));

    if let Err(e) = send_list(&mut socket, &state, &project_id).await {
        debug!("presence send failed: {e}");
        return;
    }

    let mut last_session_id: Option<String> = None;

    loop {
        tokio::select! {
            notified = rx.recv() => {
                if notified.is_none() {
                    break;
                }
                if send_list(&mut socket, &state, &project_id).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Heartbeat { session_id, .. }) => {
                                state.presence.heartbeat(&project_id, &user_id, &session_id, &state.broadcaster);
                                last_session_id = Some(session_id);
                            }
                            Ok(ClientFrame::Leave) => {
                                if let Some(session_id) = &last_session_id {
                                    state.presence.leave(&project_id, &user_id, session_id, &state.broadcaster);
                                }
                            }
                            Err(e) => debug!("unrecognized presence frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    if let Some(session_id) = &last_session_id {
        state.presence.leave(&project_id, &user_id, session_id, &state.broadcaster);
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_list(
    socket: &mut WebSocket,
    state: &AppState,
    project_id: &str,
) -> Result<(), axum::Error> {
    let list = state.presence.list(project_id);
    let json = serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string());
    socket.send(Message::Text(json)).await
}
