//! The server components (C1, C4-C9): listeners, the per-connection
//! engine, flow control, and the process supervisor.

pub(crate) mod connection;
pub(crate) mod cycle;
pub(crate) mod flow;
pub(crate) mod listener;
pub(crate) mod supervisor;
pub(crate) mod upgrade;

pub use supervisor::serve;
