//! WebSocket Proxy (C7) — `spec.md` §4.7.

pub mod presence_ws;
pub mod sessions_ws;
pub mod terminal;

use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};

use crate::errors::WsCloseError;

/// Complete the handshake, then immediately send a close frame carrying
/// `reason`'s code. `spec.md` §4.7: auth/access failures close with 1008
/// "before accepting any frames" — there is no close frame without an
/// accepted connection, so every rejection upgrades first.
pub(crate) fn reject(ws: WebSocketUpgrade, reason: WsCloseError) -> axum::response::Response {
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: reason.code(),
                reason: reason.to_string().into(),
            })))
            .await;
    })
}
