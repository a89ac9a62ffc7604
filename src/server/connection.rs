//! Connection engine (C5): drives one accepted socket through repeated
//! HTTP/1.1 exchanges, per `spec.md` §4.5.
//!
//! Parsing runs synchronously against whatever is already buffered
//! (`pump`); the async loop only awaits when genuinely out of buffered
//! work, racing the active cycle's outbound messages against reading more
//! bytes off the wire via `tokio::select!`. Only one request's body is ever
//! "on the wire" at a time regardless of pipelining depth, since HTTP/1.1
//! itself serializes the byte stream; `pending` holds cycles whose heads
//! (and, for the further-ahead ones, whose bodies) have already been
//! parsed but whose application task hasn't been spawned yet.

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ai::{
    Application, HttpScope, InboundMessage, OutboundMessage, Receiver, Scope, Sender, WsData,
};
use crate::config::Config;
use crate::error::Error;
use crate::proto::{parse_head, BodyDecoder, ParseOutcome, ParsedHead};
use crate::proto::writer::{continue_response, simple_response};
use crate::proxy;

use super::cycle::RequestCycle;
use super::flow::FlowController;
use super::listener::Socket;
use super::upgrade;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Depth of the outbound channel for a WebSocket exchange, mirroring
/// `server::cycle`'s `CHANNEL_DEPTH` for HTTP cycles.
const WS_CHANNEL_DEPTH: usize = 4;

struct PreparedCycle {
    cycle: RequestCycle,
    receive: Receiver,
    send: Sender,
    scope: Scope,
}

struct ActiveCycle {
    cycle: RequestCycle,
    task: JoinHandle<std::result::Result<(), BoxError>>,
}

enum BeginOutcome {
    Dispatched,
    Rejected { bytes: Vec<u8> },
}

enum PumpOutcome {
    Continue,
    RejectAndClose,
    Upgrade(Box<ParsedHead>),
}

enum ActiveEvent {
    Message(OutboundMessage),
    TaskDone(std::result::Result<std::result::Result<(), BoxError>, tokio::task::JoinError>),
}

enum LoopEvent {
    Active(ActiveEvent),
    ReadDone(io::Result<usize>),
}

/// One accepted connection, owning its socket and the cycles flowing
/// through it.
pub(crate) struct Connection<A: Application> {
    socket: Socket,
    app: A,
    peer: crate::ai::Address,
    local: crate::ai::Address,
    secure: bool,
    root_path: String,
    /// C11/`SPEC_FULL.md` §4.11: whether `X-Forwarded-*` headers from a
    /// trusted peer (`trusted_hosts`) should override the scope's
    /// scheme/client/server fields.
    proxy_headers: bool,
    trusted_hosts: Vec<String>,
    read_buf: BytesMut,
    pending: VecDeque<PreparedCycle>,
    active: Option<ActiveCycle>,
    cur_body: Option<BodyDecoder>,
    flow: FlowController,
    limit_concurrency: Option<usize>,
    limit_max_requests: Option<u64>,
    max_header_bytes: usize,
    /// C8's keep-alive sweeper, implemented here as a per-connection idle
    /// timer rather than a central scan over connections' last-activity
    /// timestamps: raced against the idle read via `tokio::select!` below,
    /// it closes this connection the moment it goes idle too long without
    /// needing a shared registry at all.
    timeout_keep_alive: Duration,
    requests_served: u64,
    closing: bool,
    eof: bool,
    access_log: bool,
    /// Process-wide request counter shared with the supervisor's 1 Hz tick
    /// (`spec.md` §4.8), distinct from `limit_max_requests` which bounds
    /// requests on *this* connection and just forces a reconnect.
    global_requests: Option<Arc<AtomicU64>>,
}

impl<A: Application> Connection<A> {
    pub(crate) fn new(
        socket: Socket,
        app: A,
        cfg: &Config,
        global_requests: Option<Arc<AtomicU64>>,
    ) -> Self {
        let peer = socket.peer();
        let local = socket.local();
        let secure = socket.tls_info().is_some();
        Self {
            socket,
            app,
            peer,
            local,
            secure,
            root_path: cfg.root_path.clone(),
            proxy_headers: cfg.proxy_headers,
            trusted_hosts: cfg.trusted_hosts.clone(),
            read_buf: BytesMut::with_capacity(8192),
            pending: VecDeque::new(),
            active: None,
            cur_body: None,
            flow: FlowController::new(cfg.high_water, cfg.low_water, cfg.max_pipelined_requests),
            limit_concurrency: cfg.limit_concurrency,
            limit_max_requests: cfg.limit_max_requests,
            max_header_bytes: cfg.max_header_bytes,
            timeout_keep_alive: cfg.timeout_keep_alive,
            requests_served: 0,
            closing: false,
            eof: false,
            access_log: cfg.access_log,
            global_requests,
        }
    }

    /// Drives the connection until it closes, per `spec.md` §4.5's
    /// `Idle -> Reading -> Dispatched -> (Reading | Upgrading | Closing)`
    /// sketch (collapsed here into one loop rather than named states,
    /// since every transition is a direct consequence of `pump`'s result).
    pub(crate) async fn run(mut self) {
        loop {
            match self.pump() {
                Ok((bytes, outcome)) => {
                    if !bytes.is_empty() && self.write_all(&bytes).await.is_err() {
                        return;
                    }
                    match outcome {
                        PumpOutcome::Continue => {}
                        PumpOutcome::RejectAndClose => {
                            let _ = self.socket.shutdown().await;
                            return;
                        }
                        PumpOutcome::Upgrade(head) => {
                            self.run_websocket(*head).await;
                            return;
                        }
                    }
                }
                Err(e) => {
                    // B1: an oversized request line/headers gets its own
                    // status (431); every other parse failure is a plain
                    // 400, per `spec.md` §4.2/§7.
                    let status = if e.is_parse() && e.is_header_too_large() { 431 } else { 400 };
                    let bytes = simple_response(status, "");
                    let _ = self.write_all(&bytes).await;
                    let _ = self.socket.shutdown().await;
                    return;
                }
            }

            if self.active.is_none() && self.pending.is_empty() {
                if self.closing || self.eof {
                    let _ = self.socket.shutdown().await;
                    return;
                }
                let read = tokio::time::timeout(
                    self.timeout_keep_alive,
                    Self::read_into(&mut self.socket, &mut self.read_buf),
                )
                .await;
                match read {
                    Ok(Ok(0)) => self.handle_eof(),
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => return,
                    Err(_elapsed) => {
                        let _ = self.socket.shutdown().await;
                        return;
                    }
                }
                continue;
            }

            let want_read = !self.flow.is_paused() && !self.eof && !self.closing;
            let event = {
                let Connection { socket, read_buf, active, .. } = &mut self;
                let active_cycle = active.as_mut().expect("checked active.is_some above");
                tokio::select! {
                    biased;
                    ev = Self::poll_active(&mut active_cycle.cycle, &mut active_cycle.task) => LoopEvent::Active(ev),
                    n = Self::read_into(socket, read_buf), if want_read => LoopEvent::ReadDone(n),
                }
            };
            match event {
                LoopEvent::Active(ev) => self.handle_active_event(ev).await,
                LoopEvent::ReadDone(Ok(0)) => self.handle_eof(),
                LoopEvent::ReadDone(Ok(_)) => {}
                LoopEvent::ReadDone(Err(_)) => {
                    self.eof = true;
                    self.closing = true;
                }
            }
        }
    }

    /// Parses and dispatches as much as `read_buf` currently allows,
    /// without awaiting anything. Returns bytes that must be written
    /// immediately (100-continue, an auto `503`) alongside what happened.
    fn pump(&mut self) -> Result<(Vec<u8>, PumpOutcome), Error> {
        let mut out = Vec::new();
        loop {
            if self.cur_body.is_some() {
                let mut decoder = self.cur_body.take().expect("checked is_some above");
                let events = decoder.decode(&mut self.read_buf)?;
                for ev in events {
                    self.push_tail(InboundMessage::HttpRequest { body: ev.body, more_body: ev.more_body });
                }
                self.recompute_flow();
                if decoder.is_complete() {
                    continue;
                }
                self.cur_body = Some(decoder);
                return Ok((out, PumpOutcome::Continue));
            }

            match parse_head(&self.read_buf, self.max_header_bytes)? {
                ParseOutcome::Incomplete => return Ok((out, PumpOutcome::Continue)),
                ParseOutcome::Complete { head, consumed } => {
                    Buf::advance(&mut self.read_buf, consumed);
                    if head.upgrade_requested {
                        return Ok((out, PumpOutcome::Upgrade(head)));
                    }
                    match self.begin_cycle(&head) {
                        BeginOutcome::Dispatched => {
                            if head.expect_continue {
                                out.extend_from_slice(continue_response());
                            }
                        }
                        BeginOutcome::Rejected { bytes } => {
                            out.extend_from_slice(&bytes);
                            return Ok((out, PumpOutcome::RejectAndClose));
                        }
                    }
                }
            }
        }
    }

    fn begin_cycle(&mut self, head: &ParsedHead) -> BeginOutcome {
        let in_flight = self.active.is_some() as usize + self.pending.len();
        if let Some(limit) = self.limit_concurrency {
            if in_flight >= limit {
                return BeginOutcome::Rejected { bytes: simple_response(503, "") };
            }
        }

        let version = head.version;
        let keep_alive = head.should_keep_alive;
        let (scheme, client, server) = proxy::resolve(
            &head.headers,
            &self.peer,
            &self.local,
            self.secure,
            self.proxy_headers,
            &self.trusted_hosts,
        );
        let scope = Scope::Http(HttpScope {
            http_version: version,
            method: head.method.clone(),
            scheme,
            path: head.path.clone(),
            query_string: head.query.clone(),
            headers: head.headers.clone(),
            server,
            client,
            root_path: self.root_path.clone(),
        });
        let (cycle, receive, send) = RequestCycle::new(scope.clone(), version, keep_alive);
        self.pending.push_back(PreparedCycle { cycle, receive, send, scope });

        let decoder = BodyDecoder::new(head.framing);
        if decoder.is_immediately_complete() {
            self.cur_body = None;
            self.push_tail(InboundMessage::HttpRequest { body: Bytes::new(), more_body: false });
        } else {
            self.cur_body = Some(decoder);
        }
        self.promote_pending();
        BeginOutcome::Dispatched
    }

    /// Spawns the application task for the FIFO head of `pending` if no
    /// cycle is currently active, per `spec.md` §4.5's pipelining rule.
    fn promote_pending(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(prepared) = self.pending.pop_front() else {
            return;
        };
        let app = self.app.clone();
        let PreparedCycle { cycle, receive, send, scope } = prepared;
        let task = tokio::spawn(async move { app.call(scope, receive, send).await });
        self.active = Some(ActiveCycle { cycle, task });
        self.recompute_flow();
    }

    fn push_tail(&mut self, message: InboundMessage) {
        if let Some(prepared) = self.pending.back() {
            prepared.cycle.push_inbound(message);
        } else if let Some(active) = &self.active {
            active.cycle.push_inbound(message);
        }
    }

    /// Re-sums queued body bytes across active and pending cycles and
    /// re-evaluates C6's pause/resume thresholds (`spec.md` §4.6).
    fn recompute_flow(&mut self) {
        let mut total = 0u64;
        if let Some(active) = &self.active {
            total += active.cycle.queued_bytes();
        }
        for prepared in &self.pending {
            total += prepared.cycle.queued_bytes();
        }
        self.flow.note_absolute(total, self.pending.len());
    }

    async fn poll_active(
        cycle: &mut RequestCycle,
        task: &mut JoinHandle<std::result::Result<(), BoxError>>,
    ) -> ActiveEvent {
        tokio::select! {
            biased;
            msg = cycle.next_outbound() => match msg {
                Some(m) => ActiveEvent::Message(m),
                None => ActiveEvent::TaskDone(task.await),
            },
            joined = task => ActiveEvent::TaskDone(joined),
        }
    }

    async fn handle_active_event(&mut self, event: ActiveEvent) {
        match event {
            ActiveEvent::Message(msg) => {
                let applied = {
                    let active = self.active.as_mut().expect("active event implies active cycle");
                    active.cycle.apply(msg)
                };
                match applied {
                    Ok(applied) => {
                        if !applied.bytes.is_empty() && self.write_all(&applied.bytes).await.is_err() {
                            self.active = None;
                            self.closing = true;
                            return;
                        }
                        if applied.complete {
                            self.finish_active_cycle();
                        }
                    }
                    Err(e) => {
                        warn!("application violated the response contract, closing connection: {e}");
                        self.active = None;
                        self.closing = true;
                    }
                }
            }
            ActiveEvent::TaskDone(result) => self.handle_task_done(result).await,
        }
    }

    fn finish_active_cycle(&mut self) {
        let Some(active) = self.active.take() else { return };
        self.note_request_done(&active.cycle);
        if !active.cycle.keep_alive {
            self.closing = true;
        }
        if let Some(limit) = self.limit_max_requests {
            if self.requests_served >= limit {
                self.closing = true;
            }
        }
        self.promote_pending();
    }

    /// Bumps both the per-connection and process-wide request counters and
    /// emits one access-log line, per `spec.md` §9's ambient-stack addition.
    fn note_request_done(&mut self, cycle: &RequestCycle) {
        self.requests_served += 1;
        if let Some(counter) = &self.global_requests {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if self.access_log {
            if let Scope::Http(http) = &cycle.scope {
                let status = cycle.status().unwrap_or(0);
                let path = String::from_utf8_lossy(&http.path);
                info!(
                    "{} - \"{} {}\" {}",
                    self.peer.0, http.method, path, status
                );
            }
        }
    }

    /// The application task ended. If it never finished the response,
    /// that's the C4 failure disposition (`spec.md` §4.4/§7): a `500` if
    /// nothing was sent yet, otherwise the connection just closes.
    async fn handle_task_done(
        &mut self,
        result: std::result::Result<std::result::Result<(), BoxError>, tokio::task::JoinError>,
    ) {
        let Some(mut active) = self.active.take() else { return };
        let had_error = match result {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!("application task returned an error: {e}");
                true
            }
            Err(e) => {
                error!("application task panicked: {e}");
                true
            }
        };
        if !active.cycle.is_complete() {
            if let Some(bytes) = active.cycle.fail() {
                let _ = self.write_all(&bytes).await;
            }
            self.closing = true;
        } else if had_error {
            self.closing = true;
        }
        self.note_request_done(&active.cycle);
        self.promote_pending();
    }

    fn handle_eof(&mut self) {
        if let Some(active) = &mut self.active {
            active.cycle.disconnect();
        }
        for prepared in &mut self.pending {
            prepared.cycle.disconnect();
        }
        self.eof = true;
        self.closing = true;
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.socket.write_all(bytes).await
    }

    async fn read_into(socket: &mut Socket, read_buf: &mut BytesMut) -> io::Result<usize> {
        if read_buf.capacity() - read_buf.len() < 4096 {
            read_buf.reserve(8192);
        }
        socket.read_buf(read_buf).await
    }

    /// Runs the WebSocket side of the upgrade bridge (C9), per
    /// `spec.md` §4.9. Handshake and the event-shape translation are real;
    /// the relay itself is a byte pass-through (see `server::upgrade`'s
    /// module docs) rather than a full frame codec.
    async fn run_websocket(&mut self, head: ParsedHead) {
        let Some(client_key) = upgrade::find_client_key(&head.headers) else {
            let bytes = simple_response(400, "");
            let _ = self.write_all(&bytes).await;
            let _ = self.socket.shutdown().await;
            return;
        };
        let accept_key = upgrade::compute_accept_key(&client_key);
        let scope = Scope::WebSocket(upgrade::synthesize_scope(
            &head,
            self.secure,
            self.local.clone(),
            self.peer.clone(),
            self.root_path.clone(),
        ));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(WS_CHANNEL_DEPTH);
        let receive = Receiver::new(inbound_rx);
        let send = Sender::new(outbound_tx);
        let app = self.app.clone();
        let mut task = tokio::spawn(async move { app.call(scope, receive, send).await });

        let _ = inbound_tx.send(InboundMessage::WebSocketConnect);

        enum WsEvent {
            Outbound(Option<OutboundMessage>),
            ReadDone(io::Result<usize>),
            TaskDone(std::result::Result<std::result::Result<(), BoxError>, tokio::task::JoinError>),
        }

        let mut accepted = false;
        loop {
            let event = {
                let Connection { socket, read_buf, .. } = &mut *self;
                tokio::select! {
                    biased;
                    msg = outbound_rx.recv() => WsEvent::Outbound(msg),
                    n = Self::read_into(socket, read_buf) => WsEvent::ReadDone(n),
                    joined = &mut task => WsEvent::TaskDone(joined),
                }
            };
            match event {
                WsEvent::Outbound(Some(OutboundMessage::WebSocketAccept { headers })) => {
                    accepted = true;
                    let bytes = upgrade::switching_protocols_response(&accept_key, &headers);
                    if self.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                WsEvent::Outbound(Some(OutboundMessage::WebSocketSend(data))) => {
                    if accepted {
                        let bytes = match data {
                            WsData::Text(s) => s.into_bytes(),
                            WsData::Bytes(b) => b.to_vec(),
                        };
                        if self.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                }
                WsEvent::Outbound(Some(OutboundMessage::WebSocketClose { .. })) => {
                    if !accepted {
                        let bytes = upgrade::forbidden_response();
                        let _ = self.write_all(&bytes).await;
                    }
                    break;
                }
                WsEvent::Outbound(_) => break,
                WsEvent::ReadDone(Ok(0)) => {
                    let _ = inbound_tx.send(InboundMessage::WebSocketDisconnect {
                        code: upgrade::ABNORMAL_CLOSURE,
                    });
                    break;
                }
                WsEvent::ReadDone(Ok(_)) => {
                    let chunk = self.read_buf.split().freeze();
                    let _ = inbound_tx.send(InboundMessage::WebSocketReceive(upgrade::relay_inbound(chunk)));
                }
                WsEvent::ReadDone(Err(_)) => break,
                WsEvent::TaskDone(_) => break,
            }
        }
        task.abort();
        let _ = self.socket.shutdown().await;
    }
}
