//! In-container terminal wire protocol (`spec.md` §6.3).
//!
//! Frames are a one-character type code followed by the payload, carried
//! as a single WebSocket text or binary message (there is no separate
//! length prefix on the wire — the WebSocket framing already delimits
//! messages). This mirrors the shape of the teacher's length-prefixed
//! `daemon::protocol` frames (`[type][payload]`) one level up, adapted to
//! this protocol's actual type-code alphabet instead of the teacher's
//! binary `0x01..0x85` scheme.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Data frame: client→daemon payloads carry filtered input; daemon→client
/// payloads are displayed verbatim.
pub const FRAME_DATA: char = '0';
/// Window title frame, daemon→client only.
pub const FRAME_TITLE: char = '1';
/// Reserved.
pub const FRAME_RESERVED: char = '2';

/// A single parsed wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Title(String),
    Reserved(String),
    /// Resize frame: client→daemon only, `'1' || JSON`. Distinguished from
    /// [`Frame::Title`] by direction at the call site — the wire type code
    /// is shared (`'1'`) per `spec.md` §6.3.
    Resize { columns: u16, rows: u16 },
    Unknown(char, String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ResizePayload {
    columns: u16,
    rows: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
    pub columns: u16,
    pub rows: u16,
}

/// Parse a raw text message from the daemon into a [`Frame::Data`] or
/// [`Frame::Title`]. Used on the daemon→client direction, where payloads
/// are never resize frames.
pub fn parse_daemon_frame(raw: &str) -> Frame {
    let mut chars = raw.chars();
    match chars.next() {
        Some(FRAME_DATA) => Frame::Data(chars.as_str().to_string()),
        Some(FRAME_TITLE) => Frame::Title(chars.as_str().to_string()),
        Some(FRAME_RESERVED) => Frame::Reserved(chars.as_str().to_string()),
        Some(other) => Frame::Unknown(other, chars.as_str().to_string()),
        None => Frame::Unknown('\0', String::new()),
    }
}

/// Parse a raw text message from the client (browser) into a
/// [`Frame::Data`] or [`Frame::Resize`].
pub fn parse_client_frame(raw: &str) -> Frame {
    let mut chars = raw.chars();
    match chars.next() {
        Some(FRAME_DATA) => Frame::Data(chars.as_str().to_string()),
        Some(FRAME_RESERVED) => Frame::Reserved(chars.as_str().to_string()),
        Some(FRAME_TITLE) => {
            let rest = chars.as_str();
            match serde_json::from_str::<ResizePayload>(rest) {
                Ok(p) => Frame::Resize {
                    columns: p.columns,
                    rows: p.rows,
                },
                Err(_) => Frame::Unknown(FRAME_TITLE, rest.to_string()),
            }
        }
        Some(other) => Frame::Unknown(other, chars.as_str().to_string()),
        None => Frame::Unknown('\0', String::new()),
    }
}

/// Encode a client data frame: `'0' || utf8(filtered_text)`, with CSI
/// mouse-report sequences stripped first.
pub fn encode_client_data(text: &str) -> String {
    format!("{FRAME_DATA}{}", strip_mouse_reports(text))
}

/// Encode a client resize frame: `'1' || JSON.stringify({columns, rows})`.
pub fn encode_resize(columns: u16, rows: u16) -> String {
    let payload = serde_json::to_string(&ResizePayload { columns, rows })
        .expect("ResizePayload serialization is infallible");
    format!("{FRAME_TITLE}{payload}")
}

/// Encode the handshake text sent immediately after the socket opens.
pub fn encode_handshake(columns: u16, rows: u16) -> String {
    serde_json::to_string(&Handshake {
        auth_token: String::new(),
        columns,
        rows,
    })
    .expect("Handshake serialization is infallible")
}

// Three regexes covering the common SGR and X10 mouse-report forms, per
// `spec.md` §6.3 ("three regexes covering the common SGR and X10 forms").
static CSI_SGR_MOUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[<\d+;\d+;\d+[Mm]").expect("valid regex"));
static CSI_X10_MOUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[M...").expect("valid regex"));
static CSI_URXVT_MOUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[\d+;\d+;\d+M").expect("valid regex"));

/// Strip CSI mouse-report sequences (SGR `ESC[<b;x;yM/m`, X10 `ESC[Mbxy`,
/// and the urxvt variant `ESC[b;x;yM`) from client input before it is
/// forwarded to the daemon.
pub fn strip_mouse_reports(text: &str) -> String {
    let text = CSI_SGR_MOUSE.replace_all(text, "");
    let text = CSI_URXVT_MOUSE.replace_all(&text, "");
    let text = CSI_X10_MOUSE.replace_all(&text, "");
    text.into_owned()
}

/// Session-ended substrings `spec.md` §6.3 requires the client to detect
/// (case-insensitively) in any daemon→client data frame.
const SESSION_ENDED_MARKERS: &[&str] = &[
    "screen is terminating",
    "session terminated",
    "[exited]",
    "no server running",
];

/// Whether a daemon→client data frame's payload indicates the underlying
/// session has ended.
pub fn indicates_session_ended(payload: &str) -> bool {
    let lower = payload.to_lowercase();
    SESSION_ENDED_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_frame() {
        assert_eq!(parse_daemon_frame("0hello"), Frame::Data("hello".into()));
    }

    #[test]
    fn parses_title_frame() {
        assert_eq!(
            parse_daemon_frame("1my-title"),
            Frame::Title("my-title".into())
        );
    }

    #[test]
    fn parses_resize_frame() {
        let raw = encode_resize(120, 40);
        assert_eq!(
            parse_client_frame(&raw),
            Frame::Resize {
                columns: 120,
                rows: 40
            }
        );
    }

    #[test]
    fn unknown_type_code_preserved() {
        match parse_daemon_frame("9xyz") {
            Frame::Unknown(c, rest) => {
                assert_eq!(c, '9');
                assert_eq!(rest, "xyz");
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn encode_client_data_prefixes_type_code() {
        assert_eq!(encode_client_data("ls -la"), "0ls -la");
    }

    #[test]
    fn strips_sgr_mouse_sequence() {
        let input = "before\x1b[<0;10;20Mafter";
        let filtered = strip_mouse_reports(input);
        assert_eq!(filtered, "beforeafter");
    }

    #[test]
    fn strips_x10_mouse_sequence() {
        let input = "before\x1b[M !\"after";
        let filtered = strip_mouse_reports(input);
        assert_eq!(filtered, "beforeafter");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_mouse_reports("just some text"), "just some text");
    }

    #[test]
    fn detects_session_ended_markers_case_insensitive() {
        assert!(indicates_session_ended("SCREEN IS TERMINATING now"));
        assert!(indicates_session_ended("the session terminated abruptly"));
        assert!(indicates_session_ended("bash: [exited]"));
        assert!(indicates_session_ended("No Server Running on socket"));
        assert!(!indicates_session_ended("just a normal prompt$ "));
    }

    #[test]
    fn handshake_roundtrips_through_json() {
        let raw = encode_handshake(80, 24);
        let parsed: Handshake = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.columns, 80);
        assert_eq!(parsed.rows, 24);
        assert_eq!(parsed.auth_token, "");
    }
}
