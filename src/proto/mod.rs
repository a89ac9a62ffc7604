//! HTTP/1.1 wire protocol pieces: head parsing (C2), body decoding (C2
//! continuation), and response serialization (C3).

pub(crate) mod body;
pub(crate) mod parser;
pub(crate) mod writer;

pub(crate) use body::{BodyDecoder, BodyEvent};
pub(crate) use parser::{parse_head, BodyFraming, ParseOutcome, ParsedHead};
pub(crate) use writer::{continue_response, simple_response, ResponseEncoder, StartOutcome};
