//! Scope types (C10): the immutable per-exchange metadata handed to the
//! hosted application, per `spec.md` §3 and §6.

use bytes::Bytes;

/// A lower-cased header name paired with its raw value, both as bytes, per
/// `spec.md` §6 ("headers (sequence of (lower-name-bytes, value-bytes))").
pub type HeaderList = Vec<(Bytes, Bytes)>;

/// A `(host, port)` pair as carried in `server`/`client` scope fields.
pub type Address = (String, u16);

/// The HTTP version negotiated for this exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "1.0",
            Self::Http11 => "1.1",
        }
    }
}

/// Scope for an HTTP exchange (`type = "http"`).
#[derive(Debug, Clone)]
pub struct HttpScope {
    pub http_version: HttpVersion,
    /// Uppercase ASCII, e.g. `GET`.
    pub method: String,
    /// `"http"` or `"https"`.
    pub scheme: String,
    /// Percent-encoded, taken verbatim from the request line.
    pub path: Bytes,
    pub query_string: Bytes,
    pub headers: HeaderList,
    pub server: Address,
    pub client: Address,
    pub root_path: String,
}

/// Scope for a WebSocket exchange (`type = "websocket"`).
#[derive(Debug, Clone)]
pub struct WebSocketScope {
    /// `"ws"` or `"wss"`.
    pub scheme: String,
    pub path: Bytes,
    pub query_string: Bytes,
    pub headers: HeaderList,
    pub server: Address,
    pub client: Address,
    pub root_path: String,
}

/// Scope for the process-wide lifespan exchange (`type = "lifespan"`).
#[derive(Debug, Clone, Default)]
pub struct LifespanScope {}

/// The tagged union of scopes the core may hand to an application, per
/// `spec.md` §9 ("Three variants of *scope* are carried as a tagged union").
#[derive(Debug, Clone)]
pub enum Scope {
    Http(HttpScope),
    WebSocket(WebSocketScope),
    Lifespan(LifespanScope),
}

impl Scope {
    #[must_use]
    pub fn as_http(&self) -> Option<&HttpScope> {
        match self {
            Self::Http(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_websocket(&self) -> Option<&WebSocketScope> {
        match self {
            Self::WebSocket(s) => Some(s),
            _ => None,
        }
    }
}
