//! Request body decoding (C2 continuation): turns buffered wire bytes
//! into `{body, more_body}` events per `spec.md` §4.10, honoring whichever
//! framing `proto::parser` decided (`BodyFraming`).

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Parse};

use super::parser::BodyFraming;

/// One decoded body event: a chunk of bytes and whether more will follow.
pub(crate) struct BodyEvent {
    pub body: Bytes,
    pub more_body: bool,
}

pub(crate) enum BodyDecoder {
    /// No body was framed for this message at all.
    None,
    /// `content-length: n` framing.
    Length { remaining: u64 },
    /// `transfer-encoding: chunked` framing.
    Chunked(ChunkedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkedState {
    ChunkHead,
    ChunkData { remaining: u64 },
    ChunkDataCrlf,
    TrailerLine,
    Done,
}

impl BodyDecoder {
    pub(crate) fn new(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::None => Self::None,
            BodyFraming::ContentLength(0) => Self::Length { remaining: 0 },
            BodyFraming::ContentLength(n) => Self::Length { remaining: n },
            BodyFraming::Chunked => Self::Chunked(ChunkedState::ChunkHead),
        }
    }

    /// Whether the message never declared a body at all (GET-with-no-body,
    /// or `content-length: 0`).
    pub(crate) fn is_immediately_complete(&self) -> bool {
        matches!(self, Self::None | Self::Length { remaining: 0 })
    }

    /// Drains as many complete body events as `buf` currently allows.
    /// Leaves any bytes belonging to the *next* pipelined message in `buf`.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Vec<BodyEvent>, Error> {
        let mut events = Vec::new();
        loop {
            match self {
                Self::None => break,
                Self::Length { remaining } => {
                    if *remaining == 0 {
                        break;
                    }
                    if buf.is_empty() {
                        break;
                    }
                    let take = (*remaining as usize).min(buf.len());
                    let chunk = buf.split_to(take).freeze();
                    *remaining -= take as u64;
                    events.push(BodyEvent {
                        body: chunk,
                        more_body: *remaining > 0,
                    });
                    if *remaining == 0 {
                        break;
                    }
                }
                Self::Chunked(state) => {
                    if !decode_chunked_step(state, buf, &mut events)? {
                        break;
                    }
                }
            }
        }
        Ok(events)
    }

    /// True once the framed body (of whatever kind) has been fully decoded.
    pub(crate) fn is_complete(&self) -> bool {
        match self {
            Self::None => true,
            Self::Length { remaining } => *remaining == 0,
            Self::Chunked(state) => *state == ChunkedState::Done,
        }
    }
}

/// Advances the chunked decoder by exactly one state transition. Returns
/// `Ok(true)` if progress was made (caller should loop again), `Ok(false)`
/// if more bytes are needed.
fn decode_chunked_step(
    state: &mut ChunkedState,
    buf: &mut BytesMut,
    events: &mut Vec<BodyEvent>,
) -> Result<bool, Error> {
    match *state {
        ChunkedState::ChunkHead => {
            let Some(line_end) = find_crlf(buf) else {
                return Ok(false);
            };
            let line = buf.split_to(line_end + 2);
            let size_str = &line[..line_end];
            let size_str = size_str
                .split(|b| *b == b';')
                .next()
                .unwrap_or(size_str);
            let size_str =
                std::str::from_utf8(size_str).map_err(|_| Error::new_parse(Parse::Header))?;
            let size = u64::from_str_radix(size_str.trim(), 16)
                .map_err(|_| Error::new_parse(Parse::Header))?;
            if size == 0 {
                *state = ChunkedState::TrailerLine;
            } else {
                *state = ChunkedState::ChunkData { remaining: size };
            }
            Ok(true)
        }
        ChunkedState::ChunkData { remaining } => {
            if buf.is_empty() {
                return Ok(false);
            }
            let take = (remaining as usize).min(buf.len());
            let chunk = buf.split_to(take).freeze();
            let left = remaining - take as u64;
            events.push(BodyEvent {
                body: chunk,
                more_body: true,
            });
            *state = if left == 0 {
                ChunkedState::ChunkDataCrlf
            } else {
                ChunkedState::ChunkData { remaining: left }
            };
            Ok(true)
        }
        ChunkedState::ChunkDataCrlf => {
            if buf.len() < 2 {
                return Ok(false);
            }
            if &buf[..2] != b"\r\n" {
                return Err(Error::new_parse(Parse::Header));
            }
            buf.advance(2);
            *state = ChunkedState::ChunkHead;
            Ok(true)
        }
        ChunkedState::TrailerLine => {
            let Some(line_end) = find_crlf(buf) else {
                return Ok(false);
            };
            let blank = line_end == 0;
            buf.advance(line_end + 2);
            if blank {
                *state = ChunkedState::Done;
                if let Some(last) = events.last_mut() {
                    last.more_body = false;
                } else {
                    events.push(BodyEvent {
                        body: Bytes::new(),
                        more_body: false,
                    });
                }
            }
            Ok(true)
        }
        ChunkedState::Done => Ok(false),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
