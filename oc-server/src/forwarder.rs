//! Front-door Forwarder (C8) — `spec.md` §4.8.
//!
//! A raw `TcpListener` in front of the public port: sniffs the first bytes
//! of each connection for an HTTP upgrade request whose path matches one
//! of the three proxy prefixes, and splices the connection through to
//! either the proxy listener or the HTTP-application listener depending on
//! what it saw — never rejecting outright. Grounded on the teacher's
//! `local_shell`/`serial` backends' raw-stream handling style, generalized
//! from "attach a PTY" to "forward a socket".

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

const SNIFF_LIMIT: usize = 512;
const ALLOWED_PREFIXES: [&str; 3] = ["/terminal/", "/presence/", "/sessions/"];

/// Inspect the first line of an HTTP request read from `peek`, returning
/// `true` if it is a GET with an upgrade request against an allowed
/// prefix. `spec.md` §4.8: anything else is rejected without forwarding.
fn is_allowed_upgrade(buf: &[u8]) -> bool {
    let text = match std::str::from_utf8(buf) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let mut lines = text.split("\r\n");
    let request_line = match lines.next() {
        Some(l) => l,
        None => return false,
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if method != "GET" {
        return false;
    }

    let has_upgrade_header = text
        .to_lowercase()
        .contains("upgrade: websocket");

    has_upgrade_header && ALLOWED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Run the forwarder loop: accept on `listen_addr`, sniff, splice to
/// `proxy_addr` (WebSocket upgrades against an allowed prefix) or
/// `http_addr` (everything else). Runs until signaled to shut down.
pub async fn run(
    listen_addr: SocketAddr,
    proxy_addr: SocketAddr,
    http_addr: SocketAddr,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    debug!(%listen_addr, %proxy_addr, %http_addr, "front-door forwarder listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, proxy_addr, http_addr).await {
                        warn!(%peer, "forwarder connection error: {e}");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    proxy_addr: SocketAddr,
    http_addr: SocketAddr,
) -> std::io::Result<()> {
    let mut sniff_buf = vec![0u8; SNIFF_LIMIT];
    let n = client.read(&mut sniff_buf).await?;
    sniff_buf.truncate(n);

    let target = if is_allowed_upgrade(&sniff_buf) {
        proxy_addr
    } else {
        http_addr
    };

    let mut upstream = TcpStream::connect(target).await?;
    upstream.write_all(&sniff_buf).await?;

    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_terminal_upgrade() {
        let req = "GET /terminal/abc123 HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        assert!(is_allowed_upgrade(req.as_bytes()));
    }

    #[test]
    fn accepts_matching_presence_upgrade() {
        let req = "GET /presence/p1 HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(is_allowed_upgrade(req.as_bytes()));
    }

    #[test]
    fn rejects_non_get_method() {
        let req = "POST /terminal/abc123 HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(!is_allowed_upgrade(req.as_bytes()));
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let req = "GET /terminal/abc123 HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(!is_allowed_upgrade(req.as_bytes()));
    }

    #[test]
    fn rejects_unknown_prefix() {
        let req = "GET /admin/secret HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(!is_allowed_upgrade(req.as_bytes()));
    }

    #[test]
    fn case_insensitive_upgrade_header() {
        let req = "GET /sessions/p1 HTTP/1.1\r\nUPGRADE: WebSocket\r\n\r\n";
        assert!(is_allowed_upgrade(req.as_bytes()));
    }
}
