//! Request state machine (C4): one per HTTP exchange. Bridges the AI
//! `scope`/`receive`/`send` contract the application sees onto the wire
//! bytes C3 serializes, enforcing the ordering table in `spec.md` §4.4.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ai::{HttpVersion, InboundMessage, OutboundMessage, Receiver, Scope, Sender};
use crate::error::{Error, Protocol};
use crate::proto::writer::{simple_response, ResponseEncoder, StartOutcome};

/// Depth of the outbound channel bridging this cycle to the application
/// task. The inbound side is unbounded: C6's `FlowController` gates
/// whether the connection reads more off the wire at all, not channel
/// capacity (`spec.md` §4.6).
const CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AwaitingStart,
    HeadersSent,
    StreamingBody,
    Complete,
    Disconnected,
}

/// One HTTP request/response pair on a Connection, per `spec.md` §3.
pub(crate) struct RequestCycle {
    pub(crate) scope: Scope,
    pub(crate) version: HttpVersion,
    pub(crate) keep_alive: bool,
    phase: Phase,
    status: Option<u16>,
    encoder: ResponseEncoder,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    /// Bytes handed to `push_inbound` but not yet pulled by the
    /// application's `receive()`. Feeds C6's `FlowController`; see
    /// `ai::app::Receiver::with_byte_accounting`.
    queued_bytes: Arc<AtomicU64>,
}

/// Bytes produced by feeding one `OutboundMessage` through the cycle, plus
/// whether the cycle reached `Complete` as a result.
pub(crate) struct Applied {
    pub(crate) bytes: Vec<u8>,
    pub(crate) complete: bool,
}

impl RequestCycle {
    /// Creates a cycle and the application-facing `Receiver`/`Sender` pair
    /// that should be handed to `Application::call`.
    pub(crate) fn new(scope: Scope, version: HttpVersion, keep_alive: bool) -> (Self, Receiver, Sender) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let queued_bytes = Arc::new(AtomicU64::new(0));
        let cycle = Self {
            scope,
            version,
            keep_alive,
            phase: Phase::AwaitingStart,
            status: None,
            encoder: ResponseEncoder::new(),
            inbound_tx,
            outbound_rx,
            queued_bytes: Arc::clone(&queued_bytes),
        };
        let receiver = Receiver::with_byte_accounting(inbound_rx, queued_bytes);
        (cycle, receiver, Sender::new(outbound_tx))
    }

    /// Current count of body bytes handed to `push_inbound` but not yet
    /// pulled by the application, for C6's `FlowController` accounting.
    pub(crate) fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Complete | Phase::Disconnected)
    }

    pub(crate) fn has_started_response(&self) -> bool {
        !matches!(self.phase, Phase::AwaitingStart)
    }

    /// The status passed to `http.response.start`, once sent, for access
    /// logging (`spec.md` §9 ambient-stack addition).
    pub(crate) fn status(&self) -> Option<u16> {
        self.status
    }

    /// Queues one inbound event for the application's `receive()`. Returns
    /// `false` if the application task has already dropped its `Receiver`
    /// (it stopped listening, e.g. it returned early).
    pub(crate) fn push_inbound(&self, message: InboundMessage) -> bool {
        if let InboundMessage::HttpRequest { body, .. } = &message {
            self.queued_bytes.fetch_add(body.len() as u64, Ordering::Relaxed);
        }
        self.inbound_tx.send(message).is_ok()
    }

    /// Marks the cycle as disconnected and notifies the application via a
    /// final `http.disconnect`, best-effort.
    pub(crate) fn disconnect(&mut self) {
        let _ = self.inbound_tx.send(InboundMessage::HttpDisconnect);
        self.phase = Phase::Disconnected;
    }

    /// Awaits the next message the application sends, or `None` once the
    /// application task has dropped its `Sender` (it returned).
    pub(crate) async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        self.outbound_rx.recv().await
    }

    /// Applies one outbound message against the phase table in
    /// `spec.md` §4.4, producing the bytes (if any) to write to the
    /// socket.
    pub(crate) fn apply(&mut self, message: OutboundMessage) -> Result<Applied, Error> {
        match (self.phase, message) {
            (Phase::AwaitingStart, OutboundMessage::ResponseStart { status, headers }) => {
                let bytes = match self.encoder.start(status, &headers, self.version, &mut self.keep_alive)? {
                    StartOutcome::Ready(bytes) => bytes,
                    StartOutcome::Deferred => Vec::new(),
                };
                self.status = Some(status);
                self.phase = Phase::HeadersSent;
                Ok(Applied { bytes, complete: false })
            }
            (Phase::HeadersSent | Phase::StreamingBody, OutboundMessage::ResponseBody { body, more_body }) => {
                let bytes = self.encoder.body(body, more_body)?;
                self.phase = if more_body { Phase::StreamingBody } else { Phase::Complete };
                Ok(Applied { bytes, complete: !more_body })
            }
            _ => Err(Error::new_protocol(Protocol::UnknownMessageType)),
        }
    }

    /// Called when the application task ends without completing the
    /// cycle. Per `spec.md` §4.4 failure semantics: a 500 if nothing was
    /// sent yet, otherwise the connection is closed abruptly (no bytes
    /// returned here — the caller must not write a trailing terminator).
    pub(crate) fn fail(&mut self) -> Option<Vec<u8>> {
        match self.phase {
            Phase::AwaitingStart => {
                self.phase = Phase::Complete;
                self.status = Some(500);
                Some(simple_response(500, ""))
            }
            _ => {
                self.phase = Phase::Complete;
                None
            }
        }
    }
}
