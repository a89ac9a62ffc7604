//! HTTP/1.1 parser adapter (C2).
//!
//! Wraps `httparse` to turn raw bytes into the parse events named in
//! `spec.md` §4.2: message begin / headers complete / body chunk / message
//! complete, plus an `UpgradeRequested` signal for the `Upgrade` handshake
//! (C9). `on_url`/`on_header` are folded into the single `ParsedHead`
//! produced once headers are complete, since `httparse` itself parses the
//! whole head in one pass rather than emitting incremental callbacks.

use bytes::Bytes;

use crate::ai::{Address, HeaderList, HttpVersion};
use crate::error::{Error, Parse};

/// Hard ceiling on the number of headers `httparse` will parse per request.
pub(crate) const DEFAULT_MAX_HEADERS: usize = 100;

/// The request line and headers of one HTTP/1.1 message, per `spec.md` §4.2.
#[derive(Debug, Clone)]
pub(crate) struct ParsedHead {
    pub method: String,
    pub path: Bytes,
    pub query: Bytes,
    pub version: HttpVersion,
    pub headers: HeaderList,
    pub should_keep_alive: bool,
    pub upgrade_requested: bool,
    pub expect_continue: bool,
    pub framing: BodyFraming,
}

/// How the request body (if any) is delimited on the wire, derived from
/// `content-length`/`transfer-encoding` per RFC 7230 §3.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    None,
    ContentLength(u64),
    Chunked,
}

/// Outcome of attempting to parse the head out of a growing buffer.
pub(crate) enum ParseOutcome {
    /// Not enough bytes buffered yet; keep reading.
    Incomplete,
    /// A complete head was parsed; `consumed` bytes should be drained from
    /// the front of the buffer (the rest is body/pipeline data).
    Complete {
        head: Box<ParsedHead>,
        consumed: usize,
    },
}

/// Attempts to parse a request head from `buf`. Returns `Err` on malformed
/// input (C2 disposition: close, 400 if nothing sent yet) or if the head
/// exceeds `max_header_bytes` (`spec.md` B1: 431, default 16 KiB).
pub(crate) fn parse_head(buf: &[u8], max_header_bytes: usize) -> Result<ParseOutcome, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; DEFAULT_MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);

    let status = req.parse(buf).map_err(|e| Error::new_parse(e.into()))?;
    let consumed = match status {
        httparse::Status::Partial => {
            // Still growing with no terminator in sight; only a problem
            // once it's already past the cap (a body that trails a
            // *within-budget* head is unaffected, since that head would
            // have completed and hit the branch below instead).
            if buf.len() > max_header_bytes {
                return Err(Error::new_parse(Parse::TooLarge));
            }
            return Ok(ParseOutcome::Incomplete);
        }
        httparse::Status::Complete(n) => {
            // `n` is the head's own length, not `buf.len()` — a large
            // body or pipelined request trailing a modest head must not
            // be penalized for the unrelated bytes sitting behind it.
            if n > max_header_bytes {
                return Err(Error::new_parse(Parse::TooLarge));
            }
            n
        }
    };

    let method = req
        .method
        .ok_or_else(|| Error::new_parse(Parse::Method))?
        .to_ascii_uppercase();

    let version = match req.version.ok_or_else(|| Error::new_parse(Parse::Version))? {
        0 => HttpVersion::Http10,
        1 => HttpVersion::Http11,
        _ => return Err(Error::new_parse(Parse::Version)),
    };

    let target = req.path.ok_or_else(|| Error::new_parse(Parse::Uri))?;
    let (path, query) = split_target(target);

    let mut headers = HeaderList::new();
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut connection_close = false;
    let mut connection_keep_alive = false;
    let mut upgrade_requested = false;
    let mut expect_continue = false;

    for h in req.headers.iter() {
        let name_lower = h.name.to_ascii_lowercase();
        let value = Bytes::copy_from_slice(h.value);

        match name_lower.as_str() {
            "content-length" => {
                let s =
                    std::str::from_utf8(h.value).map_err(|_| Error::new_parse(Parse::ContentLengthInvalid))?;
                let n: u64 = s
                    .trim()
                    .parse()
                    .map_err(|_| Error::new_parse(Parse::ContentLengthInvalid))?;
                if content_length.is_some_and(|existing| existing != n) {
                    return Err(Error::new_parse(Parse::ContentLengthInvalid));
                }
                content_length = Some(n);
            }
            "transfer-encoding" => {
                if h.value.eq_ignore_ascii_case(b"chunked")
                    || ascii_ends_with_ignore_case(h.value, b"chunked")
                {
                    chunked = true;
                } else {
                    return Err(Error::new_parse(Parse::TransferEncodingInvalid));
                }
            }
            "connection" => {
                if contains_token_ignore_case(h.value, b"close") {
                    connection_close = true;
                } else if contains_token_ignore_case(h.value, b"keep-alive") {
                    connection_keep_alive = true;
                }
                if contains_token_ignore_case(h.value, b"upgrade") {
                    upgrade_requested = true;
                }
            }
            "upgrade" => {
                if h.value.eq_ignore_ascii_case(b"websocket") {
                    upgrade_requested = true;
                }
            }
            "expect" => {
                if h.value.eq_ignore_ascii_case(b"100-continue") {
                    expect_continue = true;
                }
            }
            _ => {}
        }

        headers.push((Bytes::from(name_lower), value));
    }

    if chunked && content_length.is_some() {
        // RFC 7230 §3.3.3: transfer-encoding takes precedence, but a
        // conforming sender should not send both. Treat as invalid framing.
        return Err(Error::new_parse(Parse::TransferEncodingInvalid));
    }

    let should_keep_alive = match version {
        HttpVersion::Http11 => !connection_close,
        HttpVersion::Http10 => connection_keep_alive,
    };

    let framing = if chunked {
        BodyFraming::Chunked
    } else if let Some(n) = content_length {
        BodyFraming::ContentLength(n)
    } else {
        BodyFraming::None
    };

    let head = ParsedHead {
        method,
        path,
        query,
        version,
        headers,
        should_keep_alive,
        upgrade_requested,
        expect_continue,
        framing,
    };

    Ok(ParseOutcome::Complete {
        head: Box::new(head),
        consumed,
    })
}

fn split_target(target: &str) -> (Bytes, Bytes) {
    match target.split_once('?') {
        Some((p, q)) => (
            Bytes::copy_from_slice(p.as_bytes()),
            Bytes::copy_from_slice(q.as_bytes()),
        ),
        None => (Bytes::copy_from_slice(target.as_bytes()), Bytes::new()),
    }
}

fn contains_token_ignore_case(value: &[u8], token: &[u8]) -> bool {
    value
        .split(|b| *b == b',')
        .map(|part| trim_ascii(part))
        .any(|part| part.eq_ignore_ascii_case(token))
}

fn ascii_ends_with_ignore_case(value: &[u8], token: &[u8]) -> bool {
    // Last element of a comma-separated transfer-coding list, per RFC 7230.
    value
        .rsplit(|b| *b == b',')
        .next()
        .map(trim_ascii)
        .is_some_and(|last| last.eq_ignore_ascii_case(token))
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

/// Resolves a peer's socket address into a scope `(host, port)` pair.
pub(crate) fn address_of(addr: std::net::SocketAddr) -> Address {
    (addr.ip().to_string(), addr.port())
}
