//! Error and Result types shared across the crate.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type returned from fallible crate operations.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The error type produced by this crate.
///
/// The `Display` implementation only prints the description for this level
/// of the error; use `source()` (or `std::error::Report`) to see the full
/// chain. The exact wording is unspecified and may change between versions.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<BoxError>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// C2: the HTTP/1.1 parser rejected the bytes on the wire.
    Parse(Parse),
    /// C4/C10: the application misused the scope/receive/send contract.
    Protocol(Protocol),
    /// C8: the connection/pipeline count exceeded a configured limit.
    OverLimit,
    /// C5: the hosted application task returned or panicked with an error.
    Application,
    /// C7: the application failed (or never responded) during lifespan startup.
    LifespanStartupFailed,
    /// C1/C3: an I/O error occurred on the underlying socket.
    Io,
    /// C8: a keep-alive connection was idle past `timeout_keep_alive`.
    Timeout,
    /// C8: the connection was torn down by a shutdown in progress.
    Cancelled,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Self {
        Self {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<E: Into<BoxError>>(mut self, cause: E) -> Self {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    pub(crate) fn new_parse(p: Parse) -> Self {
        Self::new(Kind::Parse(p))
    }

    pub(crate) fn new_protocol(p: Protocol) -> Self {
        Self::new(Kind::Protocol(p))
    }

    pub(crate) fn new_over_limit() -> Self {
        Self::new(Kind::OverLimit)
    }

    pub(crate) fn new_application<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(Kind::Application).with(cause)
    }

    pub(crate) fn new_lifespan_startup_failed(message: impl Into<String>) -> Self {
        Self::new(Kind::LifespanStartupFailed).with(message.into())
    }

    pub(crate) fn new_io(cause: io::Error) -> Self {
        Self::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_timeout() -> Self {
        Self::new(Kind::Timeout)
    }

    pub(crate) fn new_cancelled() -> Self {
        Self::new(Kind::Cancelled)
    }

    /// Returns `true` if this was an HTTP/1.1 parse error (C2, disposition: 400/close).
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns `true` if the request line or headers exceeded the
    /// configured maximum size (B1, disposition: 431, per `spec.md` §7).
    #[must_use]
    pub fn is_header_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::TooLarge))
    }

    /// Returns `true` if the application violated the scope/receive/send contract (C4/C10).
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol(_))
    }

    /// Returns `true` if this connection was rejected by `limit_concurrency` (C8).
    #[must_use]
    pub fn is_over_limit(&self) -> bool {
        matches!(self.inner.kind, Kind::OverLimit)
    }

    /// Returns `true` if this error came from the hosted application (C5).
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self.inner.kind, Kind::Application)
    }

    /// Returns `true` if this was a socket I/O error (C1/C3).
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns `true` if this was a keep-alive idle timeout (C8 sweeper).
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout)
    }

    /// Returns `true` if the application failed (or never responded)
    /// during lifespan startup (C7). `spec.md` §6 maps this to exit code 3.
    #[must_use]
    pub fn is_lifespan_startup_failed(&self) -> bool {
        matches!(self.inner.kind, Kind::LifespanStartupFailed)
    }

    fn description(&self) -> &str {
        match &self.inner.kind {
            Kind::Parse(p) => p.description(),
            Kind::Protocol(p) => p.description(),
            Kind::OverLimit => "concurrency or pipeline limit exceeded",
            Kind::Application => "error from hosted application task",
            Kind::LifespanStartupFailed => "application failed during lifespan startup",
            Kind::Io => "I/O error on connection",
            Kind::Timeout => "connection timed out",
            Kind::Cancelled => "connection cancelled by shutdown",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Parse {
    Method,
    Uri,
    Version,
    Header,
    TooLarge,
    ContentLengthInvalid,
    TransferEncodingInvalid,
}

impl Parse {
    fn description(&self) -> &'static str {
        match self {
            Self::Method => "invalid HTTP method",
            Self::Uri => "invalid request target",
            Self::Version => "invalid or unsupported HTTP version",
            Self::Header => "invalid header syntax",
            Self::TooLarge => "request line or headers exceeded the configured maximum size",
            Self::ContentLengthInvalid => "invalid content-length header",
            Self::TransferEncodingInvalid => "invalid transfer-encoding header",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Protocol {
    StartAfterStart,
    BodyBeforeStart,
    BodyAfterComplete,
    BodyOverflow,
    UnknownMessageType,
}

impl Protocol {
    fn description(&self) -> &'static str {
        match self {
            Self::StartAfterStart => "response.start sent more than once for one cycle",
            Self::BodyBeforeStart => "response.body sent before response.start",
            Self::BodyAfterComplete => "message sent after the cycle already completed",
            Self::BodyOverflow => "response body exceeded the declared content-length",
            Self::UnknownMessageType => "application sent a message of an unrecognized type",
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new_io(err)
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Self::Header,
            httparse::Error::Status => Self::Version,
            httparse::Error::TooManyHeaders => Self::TooLarge,
            httparse::Error::Version => Self::Version,
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        Self::new_parse(err.into())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("uvicore::Error");
        f.field(&self.inner.kind);
        if let Some(cause) = &self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_deref()
            .map(|c| c as &(dyn StdError + 'static))
    }
}
