//! The application interface (AI) capability: `scope`, `receive`, `send`.
//!
//! Per `spec.md` §9 design notes: "the AI is a capability (scope, receive,
//! send); implement as a trait/interface." `receive`/`send` are channel
//! endpoints, matching "`receive` is a channel take; `send` ... awaits
//! drain" — the await-for-drain half of that contract is implemented by
//! the consumer of the outbound channel (`server::cycle`, `lifespan`,
//! `server::upgrade`), which only pulls the next message once the previous
//! one has been fully written and the socket drained.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::message::{InboundMessage, OutboundMessage};
use super::scope::Scope;

/// The error type [`Application::call`] and [`Sender::send`] resolve to.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Depth of the outbound channel backing one exchange. Small on purpose:
/// it is what makes `Sender::send` "await drain" (`spec.md` §9) — the
/// application blocks once the core falls behind draining it to the
/// socket. The inbound side (`Receiver`) is intentionally unbounded; C6's
/// explicit buffer-size accounting is the flow-control mechanism for
/// inbound body bytes, not channel capacity (`spec.md` §4.6).
pub(crate) const CHANNEL_DEPTH: usize = 4;

/// The `receive()` half of the AI contract.
pub struct Receiver {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    /// Shared with the owning `RequestCycle`: decremented here as body
    /// bytes are actually handed to the application, so C6's
    /// `FlowController` sees real queue depth rather than mere enqueueing.
    queued_bytes: Option<Arc<AtomicU64>>,
}

impl Receiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self { rx, queued_bytes: None }
    }

    pub(crate) fn with_byte_accounting(
        rx: mpsc::UnboundedReceiver<InboundMessage>,
        queued_bytes: Arc<AtomicU64>,
    ) -> Self {
        Self { rx, queued_bytes: Some(queued_bytes) }
    }

    /// Returns the next queued inbound message, or `HttpDisconnect` /
    /// `WebSocketDisconnect` once the connection has gone away and the
    /// channel has been closed by the core (`spec.md` §4.4).
    pub async fn receive(&mut self) -> InboundMessage {
        let message = self.rx.recv().await.unwrap_or(InboundMessage::HttpDisconnect);
        if let (Some(counter), InboundMessage::HttpRequest { body, .. }) = (&self.queued_bytes, &message) {
            counter.fetch_sub(body.len() as u64, Ordering::Relaxed);
        }
        message
    }
}

/// The `send()` half of the AI contract.
pub struct Sender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Sender {
    pub(crate) fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Forwards a message to the core for validation and transmission.
    /// Resolves once the core has accepted the message into its write
    /// pipeline — it may not yet be on the wire, but ordering relative to
    /// prior `send` calls from this task is preserved.
    ///
    /// Returns an error if the connection has already gone away; the
    /// application should treat that as a cue to stop producing output.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), BoxError> {
        self.tx
            .send(message)
            .await
            .map_err(|e| Box::new(e) as BoxError)
    }
}

/// A hosted application: a three-argument callable over `scope`, `receive`,
/// `send`, per `spec.md` §1.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` around
/// shared state) since the core dispatches one clone per exchange.
pub trait Application: Clone + Send + Sync + 'static {
    /// Handle one exchange. Returning `Err` before sending
    /// `http.response.start` causes the core to emit a `500` (C4 failure
    /// semantics); returning `Err` after is logged and the connection is
    /// closed.
    fn call(
        &self,
        scope: Scope,
        receive: Receiver,
        send: Sender,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}
