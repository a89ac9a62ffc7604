//! An asynchronous HTTP/1.1 server core that hosts applications through a
//! three-argument `scope`/`receive`/`send` contract, in the spirit of
//! ASGI.
//!
//! - Implement [`Application`] for your handler type and pass it to
//!   [`server::serve`] along with a [`Config`].
//! - The core speaks HTTP/1.1 on the wire: parsing, chunked and
//!   content-length framing, keep-alive, pipelining, and a WebSocket
//!   upgrade handshake (the frame codec itself is out of scope; see
//!   `server::upgrade`).
//! - A lifespan coordinator runs the process-scoped startup/shutdown
//!   handshake before the first connection is accepted and after the last
//!   one drains.
//! - Flow control keeps one connection's unconsumed inbound body bytes
//!   bounded between a low and high watermark, pausing and resuming reads
//!   off the wire rather than growing memory unbounded.
//!
//! The `cli` feature (default) pulls in `clap` and `tracing-subscriber`
//! for the `uvicore` binary; library consumers who only need
//! [`server::serve`] can disable it.

#![cfg_attr(test, allow(clippy::float_cmp))]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]
#![allow(unreachable_pub)]

mod common;

mod error;
pub use self::error::{Error, Result};

pub mod ai;
pub use ai::{Application, InboundMessage, OutboundMessage, Receiver, Scope, Sender};

pub(crate) mod proto;

pub mod config;
pub use config::Config;

pub(crate) mod lifespan;

pub(crate) mod proxy;

pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
