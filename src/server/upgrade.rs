//! Upgrade bridge (C9): the HTTP→WebSocket handoff, per `spec.md` §4.9.
//!
//! The frame codec itself is a deliberate non-goal (`spec.md` §1: "the core
//! only specifies the upgrade handoff"); an embedder wires a real codec
//! through the `--ws` implementation named in `spec.md` §6. What lives here
//! is the handshake (`Sec-WebSocket-Accept` computation, `101`/`403`
//! response bytes) and the scope/event-shape translation table, plus a
//! pass-through relay so the bridge is end-to-end exercisable without one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::ai::{Address, HeaderList, WebSocketScope, WsData};
use crate::proto::parser::ParsedHead;
use crate::proto::writer::simple_response;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`,
/// per RFC 6455 §1.3.
pub(crate) fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Finds the request's `Sec-WebSocket-Key` header, if present.
pub(crate) fn find_client_key(headers: &HeaderList) -> Option<String> {
    headers.iter().find_map(|(name, value)| {
        if name.as_ref() == b"sec-websocket-key" {
            std::str::from_utf8(value).ok().map(str::to_owned)
        } else {
            None
        }
    })
}

/// The `101 Switching Protocols` response accepting the upgrade.
pub(crate) fn switching_protocols_response(accept_key: &str, extra_headers: &HeaderList) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    out.extend_from_slice(b"upgrade: websocket\r\n");
    out.extend_from_slice(b"connection: Upgrade\r\n");
    out.extend_from_slice(format!("sec-websocket-accept: {accept_key}\r\n").as_bytes());
    for (name, value) in extra_headers {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// The `403` response for a WebSocket request the application never accepted.
pub(crate) fn forbidden_response() -> Vec<u8> {
    simple_response(403, "")
}

/// Builds the scope handed to the application for a WebSocket exchange.
pub(crate) fn synthesize_scope(
    head: &ParsedHead,
    secure: bool,
    server: Address,
    client: Address,
    root_path: String,
) -> WebSocketScope {
    WebSocketScope {
        scheme: if secure { "wss".to_string() } else { "ws".to_string() },
        path: head.path.clone(),
        query_string: head.query.clone(),
        headers: head.headers.clone(),
        server,
        client,
        root_path,
    }
}

/// Close code used when the peer's socket closes without a close frame,
/// mirroring RFC 6455 §7.1.5's reserved "abnormal closure" code. Since this
/// build relays bytes rather than decoding real frames (see module docs),
/// every disconnect is reported this way rather than with a code parsed
/// out of a close frame.
pub(crate) const ABNORMAL_CLOSURE: u16 = 1006;

/// Translates one inbound relay chunk into the AI shape named in
/// `spec.md` §4.9. This is a byte pass-through, not a framer: callers
/// wire a real frame codec in front of this when one is configured.
pub(crate) fn relay_inbound(bytes: Bytes) -> WsData {
    WsData::Bytes(bytes)
}
