//! Shared harness for the end-to-end tests in `spec.md` §8: spins up a real
//! `uvicore::server::serve` instance on loopback TCP and gives tests a small
//! HTTP/1.1 client to talk to it with.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use uvicore::config::BindTarget;
use uvicore::{Application, Config};

/// Binds an ephemeral loopback port, then immediately releases it so
/// `serve` can bind the same port a moment later.
async fn reserve_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Starts `serve` on a background task with `cfg` applied on top of a
/// freshly-reserved loopback address, and returns once a client can connect.
pub async fn spawn_server<A: Application>(
    app: A,
    configure: impl FnOnce(uvicore::config::ConfigBuilder) -> uvicore::config::ConfigBuilder,
) -> (JoinHandle<()>, SocketAddr) {
    let port = reserve_port().await;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let cfg: Config = configure(Config::builder().bind(BindTarget::Tcp(addr))).build();

    let handle = tokio::spawn(async move {
        let _ = uvicore::server::serve(app, cfg).await;
    });

    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (handle, addr)
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// One parsed HTTP/1.1 response: the status line + headers (verbatim, minus
/// the trailing blank line) and the fully-decoded body.
pub struct Response {
    pub head: String,
    pub body: Vec<u8>,
}

/// Reads exactly one HTTP/1.1 response off `stream`, decoding whichever
/// framing (`content-length` or `transfer-encoding: chunked`) the head
/// declares. `leftover` carries bytes already read past the head (e.g. the
/// start of a second pipelined response) back out to the caller.
pub async fn read_response(stream: &mut TcpStream, leftover: &mut Vec<u8>) -> Response {
    let mut buf = std::mem::take(leftover);
    let head_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a full response head arrived");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut rest = buf.split_off(head_end);

    let body = if let Some(len) = content_length(&head) {
        while rest.len() < len {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the declared body arrived");
            rest.extend_from_slice(&chunk[..n]);
        }
        leftover.extend_from_slice(&rest[len..]);
        rest.truncate(len);
        rest
    } else if is_chunked(&head) {
        read_chunked_body(stream, &mut rest).await
    } else {
        Vec::new()
    };

    Response { head, body }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> Option<usize> {
    head.lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
}

fn is_chunked(head: &str) -> bool {
    head.lines()
        .any(|l| l.to_ascii_lowercase().trim() == "transfer-encoding: chunked")
}

async fn read_chunked_body(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let size_end = loop {
            if let Some(pos) = find_subslice(buf, b"\r\n") {
                break pos;
            }
            fill(stream, buf).await;
        };
        let size_line = String::from_utf8_lossy(&buf[..size_end]).to_string();
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
        buf.drain(..size_end + 2);

        if size == 0 {
            while buf.len() < 2 {
                fill(stream, buf).await;
            }
            buf.drain(..2);
            break;
        }

        while buf.len() < size + 2 {
            fill(stream, buf).await;
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
    body
}

async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>) {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await.unwrap();
    assert!(n > 0, "connection closed mid-chunked-body");
    buf.extend_from_slice(&chunk[..n]);
}

pub async fn write_all(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}
