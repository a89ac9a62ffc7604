//! Message shapes exchanged over `receive`/`send` (C10), per `spec.md` §4.10
//! and the lifespan messages from §4.7.

use bytes::Bytes;

use super::scope::HeaderList;

/// A WebSocket frame payload, per `spec.md` §4.9.
#[derive(Debug, Clone)]
pub enum WsData {
    Text(String),
    Bytes(Bytes),
}

/// Messages the core delivers to the application via `receive()`.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// `http.request`: a body chunk, per `spec.md` §4.10.
    HttpRequest { body: Bytes, more_body: bool },
    /// `http.disconnect`: the client disconnected before the cycle completed.
    HttpDisconnect,
    /// `websocket.connect`: handshake accepted, application may now accept/close.
    WebSocketConnect,
    /// `websocket.receive`: an inbound WebSocket frame.
    WebSocketReceive(WsData),
    /// `websocket.disconnect`: the peer closed the WebSocket.
    WebSocketDisconnect { code: u16 },
    /// `lifespan.startup`: queued once at process boot (§4.7 step 1).
    LifespanStartup,
    /// `lifespan.shutdown`: queued once on server shutdown (§4.7 step 3).
    LifespanShutdown,
}

/// Messages the application emits to the core via `send()`.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// `http.response.start`: status and headers (§4.10), exactly once, first.
    ResponseStart { status: u16, headers: HeaderList },
    /// `http.response.body`: zero or more, last has `more_body = false`.
    ResponseBody { body: Bytes, more_body: bool },
    /// `websocket.accept`: server replies `101 Switching Protocols` (§4.9).
    WebSocketAccept { headers: HeaderList },
    /// `websocket.send`: an outbound WebSocket frame.
    WebSocketSend(WsData),
    /// `websocket.close`: close the WebSocket, optionally before accepting.
    WebSocketClose { code: u16 },
    /// `lifespan.startup.complete` (§4.7 step 2).
    LifespanStartupComplete,
    /// `lifespan.startup.failed` (§4.7 step 2).
    LifespanStartupFailed { message: String },
    /// `lifespan.shutdown.complete` (§4.7 step 3).
    LifespanShutdownComplete,
    /// `lifespan.shutdown.failed` (§4.7 step 3).
    LifespanShutdownFailed { message: String },
}

impl OutboundMessage {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::ResponseStart { .. } => "http.response.start",
            Self::ResponseBody { .. } => "http.response.body",
            Self::WebSocketAccept { .. } => "websocket.accept",
            Self::WebSocketSend(_) => "websocket.send",
            Self::WebSocketClose { .. } => "websocket.close",
            Self::LifespanStartupComplete => "lifespan.startup.complete",
            Self::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            Self::LifespanShutdownComplete => "lifespan.shutdown.complete",
            Self::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
        }
    }
}
