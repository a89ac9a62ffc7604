//! The application interface (AI): scope, message shapes, and the
//! application capability. Grounds `spec.md`'s component C10 plus the scope
//! definitions shared by C4, C7 and C9.

mod app;
mod message;
mod scope;

pub use app::{Application, BoxError, Receiver, Sender};
pub use message::{InboundMessage, OutboundMessage, WsData};
pub use scope::{Address, HeaderList, HttpScope, HttpVersion, LifespanScope, Scope, WebSocketScope};
