//! `/terminal/:sessionId` proxy endpoint — `spec.md` §4.7.1.
//!
//! Bridges a browser WebSocket to the in-container terminal daemon,
//! buffering client frames that arrive before the upstream connection is
//! ready and draining them in order once it is. Grounded on the teacher's
//! axum `ws` upgrade handler shape (`agent`'s terminal bridge), adapted to
//! this spec's two-attempt `connectUpstream` contract.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::errors::WsCloseError;
use crate::AppState;

/// Pre-connect buffer cap (`SPEC_FULL.md` §9 Open Question resolution):
/// close 1009 if the client sends more than this many bytes before the
/// upstream connection is ready.
const PRECONNECT_BUFFER_CAP: usize = 1024 * 1024;

const UPSTREAM_CONNECT_ATTEMPTS: u32 = 10;
const UPSTREAM_ATTEMPT_SPACING: Duration = Duration::from_millis(500);
const DIRECT_OPEN_TIMEOUT: Duration = Duration::from_millis(1500);

/// Port the in-container terminal daemon listens on.
const TERMINAL_DAEMON_PORT: u16 = 7681;

pub async fn handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
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

    let session = match state.store.get_session(&session_id).await {
        Some(s) => s,
        None => return crate::ws::reject(ws, WsCloseError::AccessDenied),
    };
    let project = match &session.project_id {
        Some(pid) => state.store.get_project(pid).await,
        None => None,
    };

    let accessible = session.status == oc_core::model::SessionStatus::Running
        && session.is_accessible_by(&user_id, project.as_ref());
    if !accessible {
        return crate::ws::reject(ws, WsCloseError::AccessDenied);
    }

    let Some(container_name) = session.container_name.clone() else {
        return crate::ws::reject(ws, WsCloseError::AccessDenied);
    };

    let protocols = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>())
        .unwrap_or_else(|| vec!["tty".to_string()]);

    ws.protocols(protocols.clone())
        .on_upgrade(move |socket| bridge(socket, state, container_name, protocols))
}

async fn bridge(client: WebSocket, state: AppState, container_name: String, protocols: Vec<String>) {
    let (mut client_tx, mut client_rx) = client.split();

    // Pre-connect buffer: queue client frames while we dial upstream.
    let mut buffer: VecDeque<Vec<u8>> = VecDeque::new();
    let mut buffered_bytes: usize = 0;
    let mut overflowed = false;

    let connect_fut = connect_upstream(state.driver.clone(), &container_name, TERMINAL_DAEMON_PORT, &protocols);
    tokio::pin!(connect_fut);

    let upstream = loop {
        tokio::select! {
            biased;
            result = &mut connect_fut => break result,
            frame = client_rx.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        buffered_bytes += data.len();
                        if buffered_bytes > PRECONNECT_BUFFER_CAP {
                            overflowed = true;
                        } else {
                            buffer.push_back(data);
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        buffered_bytes += text.len();
                        if buffered_bytes > PRECONNECT_BUFFER_CAP {
                            overflowed = true;
                        } else {
                            buffer.push_back(text.into_bytes());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("client read error while connecting upstream: {e}");
                        return;
                    }
                }
                if overflowed {
                    let _ = client_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: WsCloseError::MessageTooBig.code(),
                            reason: "pre-connect buffer exceeded".into(),
                        })))
                        .await;
                    return;
                }
            }
        }
    };

    let upstream = match upstream {
        Ok(u) => u,
        Err(e) => {
            warn!(container_name, "connectUpstream failed: {e}");
            let _ = client_tx
                .send(Message::Close(Some(CloseFrame {
                    code: WsCloseError::UpstreamUnavailable.code(),
                    reason: "could not connect to terminal".into(),
                })))
                .await;
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    // Drain the pre-connect buffer in FIFO order before any post-open frame.
    while let Some(data) = buffer.pop_front() {
        if upstream_tx.send(UpstreamMessage::Binary(data)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            client_frame = client_rx.next() => {
                match client_frame {
                    Some(Ok(Message::Binary(data))) => {
                        if upstream_tx.send(UpstreamMessage::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if upstream_tx.send(UpstreamMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let close = frame.map(|f| UpstreamCloseFrame {
                            code: f.code.into(),
                            reason: f.reason,
                        });
                        let _ = upstream_tx.send(UpstreamMessage::Close(close)).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            upstream_frame = upstream_rx.next() => {
                match upstream_frame {
                    Some(Ok(UpstreamMessage::Binary(data))) => {
                        if client_tx.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Text(text))) => {
                        if client_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Close(frame))) => {
                        let close = frame.map(|f| CloseFrame {
                            code: f.code.into(),
                            reason: f.reason,
                        });
                        let _ = client_tx.send(Message::Close(close)).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    debug!(container_name, "terminal bridge closed");
}

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `connectUpstream` — `spec.md` §4.7.1: up to 10 attempts with 500 ms
/// spacing, each trying a direct WS open first and falling back to an
/// exec-tunnel over a loopback socket.
async fn connect_upstream(
    driver: Arc<dyn oc_core::driver::ContainerDriver>,
    container_name: &str,
    port: u16,
    protocols: &[String],
) -> Result<UpstreamSocket, WsCloseError> {
    for attempt in 1..=UPSTREAM_CONNECT_ATTEMPTS {
        if let Ok(socket) = try_direct(container_name, port).await {
            return Ok(socket);
        }
        match try_exec_tunnel(driver.clone(), container_name, port, protocols).await {
            Ok(socket) => return Ok(socket),
            Err(e) => debug!(container_name, attempt, "exec tunnel attempt failed: {e}"),
        }
        tokio::time::sleep(UPSTREAM_ATTEMPT_SPACING).await;
    }
    Err(WsCloseError::UpstreamUnavailable)
}

async fn try_direct(container_name: &str, port: u16) -> Result<UpstreamSocket, WsCloseError> {
    let url = format!("ws://{container_name}:{port}/ws");
    match timeout(DIRECT_OPEN_TIMEOUT, tokio_tungstenite::connect_async(&url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        _ => Err(WsCloseError::UpstreamUnavailable),
    }
}

/// Attempt B: bind an ephemeral loopback listener, spawn an interactive
/// exec of `nc localhost <port>` inside the container, splice the
/// accepted TCP connection to it, then dial the WebSocket over loopback.
async fn try_exec_tunnel(
    driver: Arc<dyn oc_core::driver::ContainerDriver>,
    container_name: &str,
    port: u16,
    _protocols: &[String],
) -> Result<UpstreamSocket, WsCloseError> {
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .map_err(|_| WsCloseError::UpstreamUnavailable)?;
    let local_addr: SocketAddr = listener
        .local_addr()
        .map_err(|_| WsCloseError::UpstreamUnavailable)?;

    let container_name_owned = container_name.to_string();
    tokio::spawn(async move {
        let (tcp, _peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("exec tunnel listener accept failed: {e}");
                return;
            }
        };
        // Listener is single-shot: dropped here after the one accept.
        drop(listener);

        let argv = vec!["nc".to_string(), "localhost".to_string(), port.to_string()];
        match driver.exec_attached(&container_name_owned, &argv).await {
            Ok(mut exec_stream) => {
                let mut tcp = tcp;
                if let Err(e) = tokio::io::copy_bidirectional(&mut tcp, &mut exec_stream).await {
                    debug!(container_name_owned, "exec tunnel splice ended: {e}");
                }
            }
            Err(e) => warn!(container_name_owned, "exec attach failed: {e}"),
        }
    });

    let url = format!("ws://{local_addr}/ws");
    match timeout(DIRECT_OPEN_TIMEOUT, tokio_tungstenite::connect_async(&url)).await {
        Ok(Ok((stream, _response))) => {
            info!(container_name, "connected via exec tunnel");
            Ok(stream)
        }
        _ => Err(WsCloseError::UpstreamUnavailable),
    }
}
