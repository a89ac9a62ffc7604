//! The literal end-to-end scenarios from `spec.md` §8, run against a real
//! `uvicore::server::serve` instance over loopback TCP.

mod support;

use std::future::Future;
use std::sync::{Arc, Mutex};

use uvicore::ai::BoxError;
use uvicore::{Application, InboundMessage, OutboundMessage, Receiver, Scope, Sender};

async fn drain_http_body(receive: &mut Receiver) -> Result<Vec<u8>, ()> {
    let mut body = Vec::new();
    loop {
        match receive.receive().await {
            InboundMessage::HttpRequest { body: chunk, more_body } => {
                body.extend_from_slice(&chunk);
                if !more_body {
                    return Ok(body);
                }
            }
            InboundMessage::HttpDisconnect => return Err(()),
            _ => {}
        }
    }
}

/// Scenario 1: simple GET.
#[derive(Clone)]
struct HelloApp;

impl Application for HelloApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move {
            if let Scope::Http(_) = scope {
                if drain_http_body(&mut receive).await.is_err() {
                    return Ok(());
                }
                send.send(OutboundMessage::ResponseStart { status: 200, headers: vec![] }).await?;
                send.send(OutboundMessage::ResponseBody { body: "Hello".into(), more_body: false }).await?;
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn simple_get() {
    let (_server, addr) = support::spawn_server(HelloApp, |b| b).await;
    let mut stream = support::connect(addr).await;
    support::write_all(&mut stream, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;

    assert!(resp.head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(resp.head.to_ascii_lowercase().contains("content-length: 5"));
    assert!(resp.head.to_ascii_lowercase().contains("date:"));
    assert_eq!(resp.body, b"Hello");

    // The connection stays open: a second request on the same socket still
    // gets answered rather than seeing EOF.
    support::write_all(&mut stream, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let resp2 = support::read_response(&mut stream, &mut leftover).await;
    assert!(resp2.head.starts_with("HTTP/1.1 200 OK\r\n"));
}

/// Scenario 2: chunked response (no declared content-length).
#[derive(Clone)]
struct ChunkedApp;

impl Application for ChunkedApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move {
            if let Scope::Http(_) = scope {
                if drain_http_body(&mut receive).await.is_err() {
                    return Ok(());
                }
                send.send(OutboundMessage::ResponseStart { status: 200, headers: vec![] }).await?;
                send.send(OutboundMessage::ResponseBody { body: "ab".into(), more_body: true }).await?;
                send.send(OutboundMessage::ResponseBody { body: "cd".into(), more_body: false }).await?;
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn chunked_response() {
    let (_server, addr) = support::spawn_server(ChunkedApp, |b| b).await;
    let mut stream = support::connect(addr).await;
    support::write_all(&mut stream, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;

    assert!(resp.head.to_ascii_lowercase().contains("transfer-encoding: chunked"));
    assert_eq!(resp.body, b"abcd");
}

/// Scenario 3: two pipelined GETs, each answered `204 No Content`.
#[derive(Clone)]
struct NoContentApp;

impl Application for NoContentApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move {
            if let Scope::Http(_) = scope {
                if drain_http_body(&mut receive).await.is_err() {
                    return Ok(());
                }
                send.send(OutboundMessage::ResponseStart { status: 204, headers: vec![] }).await?;
                send.send(OutboundMessage::ResponseBody { body: "".into(), more_body: false }).await?;
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn pipelined_gets() {
    let (_server, addr) = support::spawn_server(NoContentApp, |b| b).await;
    let mut stream = support::connect(addr).await;
    support::write_all(
        &mut stream,
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\nGET / HTTP/1.1\r\nHost: x\r\n\r\n",
    )
    .await;

    let mut leftover = Vec::new();
    let first = support::read_response(&mut stream, &mut leftover).await;
    let second = support::read_response(&mut stream, &mut leftover).await;

    assert!(first.head.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(second.head.starts_with("HTTP/1.1 204 No Content\r\n"));
}

/// Scenario 4: the application raises before sending `response.start`.
#[derive(Clone)]
struct RaisesApp;

impl Application for RaisesApp {
    fn call(&self, _scope: Scope, _receive: Receiver, _send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move { Err("application failure".into()) }
    }
}

#[tokio::test]
async fn application_raises_before_start_yields_500() {
    let (_server, addr) = support::spawn_server(RaisesApp, |b| b).await;
    let mut stream = support::connect(addr).await;
    support::write_all(&mut stream, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;
    assert!(resp.head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(resp.body.is_empty());

    // The connection is closed afterwards.
    use tokio::io::AsyncReadExt;
    let mut trailing = [0u8; 16];
    let n = stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "connection should have been closed after the 500");
}

/// Scenario 5: the client disconnects mid-body; the application sees the
/// partial bytes followed by `http.disconnect` and never responds.
#[derive(Clone)]
struct RecordingApp {
    received: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Application for RecordingApp {
    fn call(&self, scope: Scope, mut receive: Receiver, _send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        let received = Arc::clone(&self.received);
        async move {
            if let Scope::Http(_) = scope {
                let mut body = Vec::new();
                loop {
                    match receive.receive().await {
                        InboundMessage::HttpRequest { body: chunk, .. } => body.extend_from_slice(&chunk),
                        InboundMessage::HttpDisconnect => break,
                        _ => {}
                    }
                }
                *received.lock().unwrap() = Some(body);
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn client_disconnect_mid_body() {
    let received = Arc::new(Mutex::new(None));
    let app = RecordingApp { received: Arc::clone(&received) };
    let (_server, addr) = support::spawn_server(app, |b| b).await;

    let mut stream = support::connect(addr).await;
    support::write_all(
        &mut stream,
        b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\n0123456789",
    )
    .await;
    drop(stream);

    // Give the server a moment to observe the disconnect and run the
    // application to completion.
    for _ in 0..50 {
        if received.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let got = received.lock().unwrap().clone().expect("application never saw http.disconnect");
    assert_eq!(got, b"0123456789");
}

/// Scenario 6: a lifespan handler that raises before any send is tolerated
/// in `auto` mode (the default); the server still accepts and answers
/// requests normally.
#[derive(Clone)]
struct UnsupportedLifespanApp;

impl Application for UnsupportedLifespanApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move {
            match scope {
                Scope::Lifespan(_) => {
                    let _ = receive.receive().await;
                    Err("lifespan not implemented".into())
                }
                Scope::Http(_) => {
                    if drain_http_body(&mut receive).await.is_err() {
                        return Ok(());
                    }
                    send.send(OutboundMessage::ResponseStart { status: 200, headers: vec![] }).await?;
                    send.send(OutboundMessage::ResponseBody { body: "ok".into(), more_body: false }).await?;
                    Ok(())
                }
                Scope::WebSocket(_) => Ok(()),
            }
        }
    }
}

#[tokio::test]
async fn lifespan_auto_unsupported_still_serves_requests() {
    let (_server, addr) = support::spawn_server(UnsupportedLifespanApp, |b| b).await;
    let mut stream = support::connect(addr).await;
    support::write_all(&mut stream, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;
    assert!(resp.head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(resp.body, b"ok");
}

/// B1: a request whose head exceeds `max_header_bytes` is rejected with
/// `431` rather than a generic `400`, and the connection is then closed.
#[tokio::test]
async fn oversized_head_yields_431_and_closes() {
    let (_server, addr) =
        support::spawn_server(HelloApp, |b| b.max_header_bytes(64)).await;
    let mut stream = support::connect(addr).await;

    let padding = "a".repeat(1024);
    let req = format!("GET / HTTP/1.1\r\nHost: x\r\nX-Pad: {padding}\r\n\r\n");
    support::write_all(&mut stream, req.as_bytes()).await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;
    assert!(resp.head.starts_with("HTTP/1.1 431 "));
    assert!(resp.head.to_ascii_lowercase().contains("connection: close"));

    use tokio::io::AsyncReadExt;
    let mut trailing = [0u8; 16];
    let n = stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "connection should have been closed after the 431");
}

/// B4: `Expect: 100-continue` gets the interim `100 Continue` written to
/// the wire before the body arrives, and the real response follows once
/// the application answers after the body is delivered.
#[tokio::test]
async fn expect_continue_observed_on_the_wire() {
    let (_server, addr) = support::spawn_server(HelloApp, |b| b).await;
    let mut stream = support::connect(addr).await;

    support::write_all(
        &mut stream,
        b"POST / HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n",
    )
    .await;

    use tokio::io::AsyncReadExt;
    let expected_continue = b"HTTP/1.1 100 Continue\r\n\r\n";
    let mut got_continue = vec![0u8; expected_continue.len()];
    stream.read_exact(&mut got_continue).await.unwrap();
    assert_eq!(got_continue, expected_continue);

    support::write_all(&mut stream, b"world").await;

    let mut leftover = Vec::new();
    let resp = support::read_response(&mut stream, &mut leftover).await;
    assert!(resp.head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(resp.body, b"Hello");
}

/// B3: a pipeline deeper than `max_pipelined_requests` neither drops nor
/// reorders requests — the cap just delays dispatch of the ones past the
/// FIFO head until earlier cycles complete (`FlowController`'s own
/// pause/resume transition is unit-tested directly in `server::flow`).
#[derive(Clone)]
struct PipelineCapApp {
    release: Arc<tokio::sync::Notify>,
}

impl Application for PipelineCapApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        let release = Arc::clone(&self.release);
        async move {
            if let Scope::Http(_) = scope {
                let body = drain_http_body(&mut receive).await.unwrap_or_default();
                if body == b"hold" {
                    release.notified().await;
                }
                send.send(OutboundMessage::ResponseStart { status: 200, headers: vec![] }).await?;
                send.send(OutboundMessage::ResponseBody { body: body.into(), more_body: false }).await?;
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn pipeline_deeper_than_cap_is_not_dropped_or_reordered() {
    let release = Arc::new(tokio::sync::Notify::new());
    let app = PipelineCapApp { release: Arc::clone(&release) };
    let (_server, addr) =
        support::spawn_server(app, |b| b.max_pipelined_requests(3)).await;
    let mut stream = support::connect(addr).await;

    let post = |body: &str| format!("POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);

    // First cycle blocks; three more queue up behind it, filling the cap.
    support::write_all(&mut stream, post("hold").as_bytes()).await;
    support::write_all(&mut stream, post("req1").as_bytes()).await;
    support::write_all(&mut stream, post("req2").as_bytes()).await;
    support::write_all(&mut stream, post("req3").as_bytes()).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // A fifth request, past the cap, is still accepted into the backlog
    // rather than rejected.
    support::write_all(&mut stream, post("req4").as_bytes()).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    release.notify_one();

    let mut leftover = Vec::new();
    for expected in ["hold", "req1", "req2", "req3", "req4"] {
        let resp = support::read_response(&mut stream, &mut leftover).await;
        assert!(resp.head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(resp.body, expected.as_bytes());
    }
}

/// B5: a valid WebSocket upgrade gets `101 Switching Protocols` with the
/// RFC 6455 §1.3 accept key, the application observes
/// `websocket.connect`, a relayed frame round-trips, and the client
/// closing the socket yields `websocket.disconnect` with the abnormal
/// closure code (no frame codec is wired in, see `server::upgrade`).
#[derive(Clone)]
struct EchoWsApp {
    disconnect_code: Arc<Mutex<Option<u16>>>,
}

impl Application for EchoWsApp {
    fn call(&self, scope: Scope, mut receive: Receiver, send: Sender) -> impl Future<Output = Result<(), BoxError>> + Send {
        let disconnect_code = Arc::clone(&self.disconnect_code);
        async move {
            if let Scope::WebSocket(_) = scope {
                match receive.receive().await {
                    InboundMessage::WebSocketConnect => {}
                    _ => return Ok(()),
                }
                send.send(OutboundMessage::WebSocketAccept { headers: vec![] }).await?;
                loop {
                    match receive.receive().await {
                        InboundMessage::WebSocketReceive(data) => {
                            send.send(OutboundMessage::WebSocketSend(data)).await?;
                        }
                        InboundMessage::WebSocketDisconnect { code } => {
                            *disconnect_code.lock().unwrap() = Some(code);
                            break;
                        }
                        _ => break,
                    }
                }
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn websocket_upgrade_round_trips_and_reports_disconnect() {
    let disconnect_code = Arc::new(Mutex::new(None));
    let app = EchoWsApp { disconnect_code: Arc::clone(&disconnect_code) };
    let (_server, addr) = support::spawn_server(app, |b| b).await;
    let mut stream = support::connect(addr).await;

    // RFC 6455 §1.3's own worked example nonce/accept-key pair.
    support::write_all(
        &mut stream,
        b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
    )
    .await;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut head_buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = head_buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 512];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0);
        head_buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&head_buf[..head_end]).to_string();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.to_ascii_lowercase().contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo="));

    stream.write_all(b"ping-payload").await.unwrap();
    let mut echoed = vec![0u8; "ping-payload".len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"ping-payload");

    drop(stream);
    for _ in 0..50 {
        if disconnect_code.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(disconnect_code.lock().unwrap().clone(), Some(1006));
}
