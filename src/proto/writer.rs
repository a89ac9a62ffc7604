//! Response writer (C3): status line, header, and body serialization with
//! framing derivation, per `spec.md` §4.3.

use bytes::Bytes;

use crate::ai::{HeaderList, HttpVersion};
use crate::common::date;
use crate::error::{Error, Protocol};

pub(crate) const SERVER_TOKEN: &str = concat!("uvicore/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy)]
enum FramingKind {
    ContentLength(u64),
    Chunked,
}

enum EncoderState {
    AwaitingStart,
    /// Headers line(s) built except the still-undecided framing header and
    /// the terminating blank line, per `spec.md` §4.3's second/third rule.
    Deferred { prefix: Vec<u8> },
    Framed { framing: FramingKind, written: u64 },
    Done,
}

/// Per-cycle response encoder driving status/header/body serialization.
pub(crate) struct ResponseEncoder {
    state: EncoderState,
}

/// Outcome of handing a `ResponseStart` to the encoder: either the full
/// head is ready to write immediately (framing was explicit), or nothing is
/// written yet pending the first body call.
pub(crate) enum StartOutcome {
    Ready(Vec<u8>),
    Deferred,
}

impl ResponseEncoder {
    pub(crate) fn new() -> Self {
        Self {
            state: EncoderState::AwaitingStart,
        }
    }

    /// Handles `http.response.start`. `keep_alive` is updated in place if
    /// the application (or protocol version) forces connection closure.
    pub(crate) fn start(
        &mut self,
        status: u16,
        headers: &HeaderList,
        version: HttpVersion,
        keep_alive: &mut bool,
    ) -> Result<StartOutcome, Error> {
        if !matches!(self.state, EncoderState::AwaitingStart) {
            return Err(Error::new_protocol(Protocol::StartAfterStart));
        }

        let mut content_length: Option<u64> = None;
        let mut saw_transfer_encoding = false;
        let mut saw_connection = false;

        for (name, value) in headers {
            match name.as_ref() {
                b"content-length" => {
                    let s = std::str::from_utf8(value)
                        .map_err(|_| Error::new_parse(crate::error::Parse::ContentLengthInvalid))?;
                    content_length = Some(s.trim().parse().map_err(|_| {
                        Error::new_parse(crate::error::Parse::ContentLengthInvalid)
                    })?);
                }
                b"transfer-encoding" => saw_transfer_encoding = true,
                b"connection" => {
                    saw_connection = true;
                    if value.eq_ignore_ascii_case(b"close") {
                        *keep_alive = false;
                    }
                }
                _ => {}
            }
        }
        let _ = saw_transfer_encoding;

        let mut prefix = Vec::with_capacity(256);
        let reason = reason_phrase(status);
        prefix.extend_from_slice(
            format!("HTTP/{} {status} {reason}\r\n", version.as_str()).as_bytes(),
        );
        prefix.extend_from_slice(format!("server: {SERVER_TOKEN}\r\n").as_bytes());
        prefix.extend_from_slice(b"date: ");
        date::extend(&mut prefix);
        prefix.extend_from_slice(b"\r\n");

        for (name, value) in headers {
            if name.as_ref() == b"content-length" || name.as_ref() == b"transfer-encoding" {
                continue;
            }
            prefix.extend_from_slice(name);
            prefix.extend_from_slice(b": ");
            prefix.extend_from_slice(value);
            prefix.extend_from_slice(b"\r\n");
        }
        if !saw_connection && !*keep_alive {
            prefix.extend_from_slice(b"connection: close\r\n");
        }

        if let Some(n) = content_length {
            prefix.extend_from_slice(format!("content-length: {n}\r\n").as_bytes());
            prefix.extend_from_slice(b"\r\n");
            self.state = EncoderState::Framed {
                framing: FramingKind::ContentLength(n),
                written: 0,
            };
            Ok(StartOutcome::Ready(prefix))
        } else {
            self.state = EncoderState::Deferred { prefix };
            Ok(StartOutcome::Deferred)
        }
    }

    /// Handles one `http.response.body` call, returning the bytes to write.
    pub(crate) fn body(&mut self, body: Bytes, more_body: bool) -> Result<Vec<u8>, Error> {
        match std::mem::replace(&mut self.state, EncoderState::Done) {
            EncoderState::AwaitingStart => Err(Error::new_protocol(Protocol::BodyBeforeStart)),
            EncoderState::Done => Err(Error::new_protocol(Protocol::BodyAfterComplete)),
            EncoderState::Deferred { mut prefix } => {
                let framing = if more_body {
                    prefix.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");
                    FramingKind::Chunked
                } else {
                    prefix.extend_from_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
                    FramingKind::ContentLength(body.len() as u64)
                };
                let mut out = prefix;
                encode_body(&mut out, &framing, &body, more_body)?;
                self.state = if more_body {
                    EncoderState::Framed { framing, written: body.len() as u64 }
                } else {
                    EncoderState::Done
                };
                Ok(out)
            }
            EncoderState::Framed { framing, written } => {
                let mut out = Vec::with_capacity(body.len() + 16);
                let new_written = written + body.len() as u64;
                if let FramingKind::ContentLength(n) = framing {
                    if new_written > n {
                        return Err(Error::new_protocol(Protocol::BodyOverflow));
                    }
                }
                encode_body(&mut out, &framing, &body, more_body)?;
                self.state = if more_body {
                    EncoderState::Framed { framing, written: new_written }
                } else {
                    EncoderState::Done
                };
                Ok(out)
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, EncoderState::Done)
    }

    pub(crate) fn is_awaiting_start(&self) -> bool {
        matches!(self.state, EncoderState::AwaitingStart)
    }
}

fn encode_body(out: &mut Vec<u8>, framing: &FramingKind, body: &Bytes, more_body: bool) -> Result<(), Error> {
    match framing {
        FramingKind::ContentLength(_) => {
            out.extend_from_slice(body);
        }
        FramingKind::Chunked => {
            if !body.is_empty() {
                out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
                out.extend_from_slice(body);
                out.extend_from_slice(b"\r\n");
            }
            if !more_body {
                out.extend_from_slice(b"0\r\n\r\n");
            }
        }
    }
    Ok(())
}

/// Serializes a complete auto-generated response (400/431/500/503), per
/// `spec.md` §9 Open Questions: `content-type: text/plain; charset=utf-8`,
/// `connection: close`, and a `content-length` matching the body bytes.
pub(crate) fn simple_response(status: u16, body: &str) -> Vec<u8> {
    let reason = reason_phrase(status);
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
    out.extend_from_slice(format!("server: {SERVER_TOKEN}\r\n").as_bytes());
    out.extend_from_slice(b"date: ");
    date::extend(&mut out);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(b"content-type: text/plain; charset=utf-8\r\n");
    out.extend_from_slice(b"connection: close\r\n");
    out.extend_from_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// The `100 Continue` interim response (`spec.md` §4.5, B4).
pub(crate) fn continue_response() -> &'static [u8] {
    b"HTTP/1.1 100 Continue\r\n\r\n"
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown Status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_response_start_to_finish() {
        let mut enc = ResponseEncoder::new();
        let mut ka = true;
        let headers = HeaderList::new();
        let out = match enc.start(200, &headers, HttpVersion::Http11, &mut ka).unwrap() {
            StartOutcome::Ready(bytes) => bytes,
            StartOutcome::Deferred => panic!("expected ready when no body sent yet"),
        };
        assert!(String::from_utf8_lossy(&out).contains("HTTP/1.1 200 OK"));
    }

    #[test]
    fn single_final_chunk_gets_content_length() {
        let mut enc = ResponseEncoder::new();
        let mut ka = true;
        let headers = HeaderList::new();
        assert!(matches!(
            enc.start(200, &headers, HttpVersion::Http11, &mut ka).unwrap(),
            StartOutcome::Deferred
        ));
        let out = enc.body(Bytes::from_static(b"Hello"), false).unwrap();
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("content-length: 5"));
        assert!(s.ends_with("Hello"));
        assert!(enc.is_done());
    }

    #[test]
    fn multi_chunk_response_is_chunked() {
        let mut enc = ResponseEncoder::new();
        let mut ka = true;
        let headers = HeaderList::new();
        assert!(matches!(
            enc.start(200, &headers, HttpVersion::Http11, &mut ka).unwrap(),
            StartOutcome::Deferred
        ));
        let first = enc.body(Bytes::from_static(b"ab"), true).unwrap();
        assert!(String::from_utf8_lossy(&first).contains("transfer-encoding: chunked"));
        assert!(String::from_utf8_lossy(&first).contains("2\r\nab\r\n"));
        let second = enc.body(Bytes::from_static(b"cd"), false).unwrap();
        assert_eq!(second, b"2\r\ncd\r\n0\r\n\r\n");
        assert!(enc.is_done());
    }

    #[test]
    fn explicit_content_length_overflow_aborts() {
        let mut enc = ResponseEncoder::new();
        let mut ka = true;
        let headers: HeaderList = vec![(Bytes::from_static(b"content-length"), Bytes::from_static(b"2"))];
        let _ = enc.start(200, &headers, HttpVersion::Http11, &mut ka).unwrap();
        assert!(enc.body(Bytes::from_static(b"abc"), false).is_err());
    }

    #[test]
    fn connection_close_header_clears_keep_alive() {
        let mut enc = ResponseEncoder::new();
        let mut ka = true;
        let headers: HeaderList = vec![(Bytes::from_static(b"connection"), Bytes::from_static(b"close"))];
        let _ = enc.start(200, &headers, HttpVersion::Http11, &mut ka).unwrap();
        assert!(!ka);
    }
}
