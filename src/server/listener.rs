//! Byte/IO layer (C1): binding listeners and the per-connection socket
//! abstraction, per `spec.md` §4.1.
//!
//! TLS termination is named in the contract (`tls_info`, scheme flips to
//! `https`) but construction of the acceptor itself is an external
//! collaborator per `spec.md` §1 "out of scope"; this module always
//! reports no TLS info, matching a plaintext-only deployment.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, RawFd};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::ai::Address;

/// Where a connection was accepted from.
pub(crate) enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub(crate) async fn bind_tcp(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::Tcp(TcpListener::bind(addr).await?))
    }

    pub(crate) fn bind_unix(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let _ = std::fs::remove_file(path);
        Ok(Self::Unix(UnixListener::bind(path)?))
    }

    /// Adopts an already-open listening socket passed in by a process
    /// supervisor (`--fd`), per `spec.md` §6.
    ///
    /// # Safety
    /// `fd` must be a valid, open, listening TCP socket owned by the
    /// caller; ownership transfers to the returned `Listener`.
    pub(crate) unsafe fn from_inherited_fd(fd: RawFd) -> io::Result<Self> {
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        std_listener.set_nonblocking(true)?;
        Ok(Self::Tcp(TcpListener::from_std(std_listener)?))
    }

    pub(crate) fn local_addr(&self) -> io::Result<String> {
        match self {
            Self::Tcp(l) => Ok(l.local_addr()?.to_string()),
            Self::Unix(l) => Ok(l
                .local_addr()?
                .as_pathname()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unix-unnamed>".to_string())),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<Socket> {
        match self {
            Self::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                stream.set_nodelay(true)?;
                let local = stream.local_addr()?;
                Ok(Socket {
                    io: SocketIo::Tcp(stream),
                    peer: (peer.ip().to_string(), peer.port()),
                    local: (local.ip().to_string(), local.port()),
                })
            }
            Self::Unix(l) => {
                let (stream, _addr) = l.accept().await?;
                Ok(Socket {
                    io: SocketIo::Unix(stream),
                    peer: ("".to_string(), 0),
                    local: ("".to_string(), 0),
                })
            }
        }
    }
}

enum SocketIo {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// One accepted connection's byte stream plus its addressing and TLS
/// metadata (`spec.md` §4.1).
pub(crate) struct Socket {
    io: SocketIo,
    peer: Address,
    local: Address,
}

impl Socket {
    pub(crate) fn peer(&self) -> Address {
        self.peer.clone()
    }

    pub(crate) fn local(&self) -> Address {
        self.local.clone()
    }

    /// Non-empty only behind a TLS acceptor; this build never terminates
    /// TLS itself, so this is always `None` and `scheme` stays `http`.
    pub(crate) fn tls_info(&self) -> Option<&'static str> {
        None
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        match &mut self.io {
            SocketIo::Tcp(s) => s.shutdown().await,
            SocketIo::Unix(s) => s.shutdown().await,
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.io {
            SocketIo::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketIo::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match &mut this.io {
            SocketIo::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketIo::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.io {
            SocketIo::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketIo::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.io {
            SocketIo::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketIo::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
