//! Command-line argument surface (`spec.md` §6), mirroring the teacher's
//! own `clap`-derived commands (`rama-cli/src/main.rs`) and its
//! `tracing-subscriber` setup (`rama-cli/src/trace.rs`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{BindTarget, Config, HttpImpl, LifespanMode, WsImpl};

/// `uvicore <app> [flags]`, matching `spec.md` §6's CLI surface.
#[derive(Debug, Parser)]
#[command(name = "uvicore", version, about, long_about = None)]
pub struct Cli {
    /// Application import reference (e.g. `mypackage.module:app`).
    ///
    /// This build hosts a fixed, statically-compiled [`crate::Application`]
    /// rather than dynamically importing one, so this is accepted and
    /// logged for interface parity with the reference CLI surface but does
    /// not select what gets served.
    pub app: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Bind to a UNIX domain socket instead of `--host`/`--port`.
    #[arg(long)]
    pub uds: Option<PathBuf>,

    /// Bind to an already-open, inherited listening socket file descriptor.
    #[arg(long)]
    pub fd: Option<i32>,

    #[arg(long, value_enum, default_value_t = CliHttpImpl::Auto)]
    pub http: CliHttpImpl,

    #[arg(long, value_enum, default_value_t = CliWsImpl::None)]
    pub ws: CliWsImpl,

    #[arg(long, value_enum, default_value_t = CliLifespanMode::Auto)]
    pub lifespan: CliLifespanMode,

    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    #[arg(long)]
    pub limit_concurrency: Option<usize>,

    #[arg(long)]
    pub limit_max_requests: Option<u64>,

    #[arg(long, default_value_t = 5)]
    pub timeout_keep_alive: u64,

    /// Bounds graceful shutdown; unset waits for every connection to drain.
    #[arg(long)]
    pub timeout_graceful_shutdown: Option<u64>,

    #[arg(long)]
    pub ssl_keyfile: Option<PathBuf>,

    #[arg(long)]
    pub ssl_certfile: Option<PathBuf>,

    #[arg(long)]
    pub proxy_headers: bool,

    #[arg(long)]
    pub root_path: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub access_log: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliHttpImpl {
    Auto,
    H11,
    Httptools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliWsImpl {
    Auto,
    None,
    Websockets,
    Wsproto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLifespanMode {
    Auto,
    On,
    Off,
}

impl Cli {
    /// Builds the runtime [`Config`] this invocation describes.
    #[must_use]
    pub fn to_config(&self) -> Config {
        let bind = if let Some(path) = &self.uds {
            BindTarget::Unix(path.clone())
        } else if let Some(fd) = self.fd {
            BindTarget::InheritedFd(fd)
        } else {
            BindTarget::Tcp(SocketAddr::new(self.host, self.port))
        };

        Config::builder()
            .bind(bind)
            .http_impl(match self.http {
                CliHttpImpl::Auto => HttpImpl::Auto,
                CliHttpImpl::H11 => HttpImpl::H11,
                CliHttpImpl::Httptools => HttpImpl::HttpTools,
            })
            .ws_impl(match self.ws {
                CliWsImpl::Auto => WsImpl::Auto,
                CliWsImpl::None => WsImpl::None,
                CliWsImpl::Websockets => WsImpl::WebSockets,
                CliWsImpl::Wsproto => WsImpl::Wsproto,
            })
            .lifespan(match self.lifespan {
                CliLifespanMode::Auto => LifespanMode::Auto,
                CliLifespanMode::On => LifespanMode::On,
                CliLifespanMode::Off => LifespanMode::Off,
            })
            .workers(self.workers)
            .limit_concurrency(self.limit_concurrency)
            .limit_max_requests(self.limit_max_requests)
            .timeout_keep_alive(Duration::from_secs(self.timeout_keep_alive))
            .timeout_graceful_shutdown(self.timeout_graceful_shutdown.map(Duration::from_secs))
            .ssl_enabled(self.ssl_keyfile.is_some() && self.ssl_certfile.is_some())
            .proxy_headers(self.proxy_headers)
            .root_path(
                self.root_path
                    .clone()
                    .or_else(|| std::env::var("SCRIPT_NAME").ok())
                    .unwrap_or_default(),
            )
            .log_level(self.log_level.clone())
            .access_log(self.access_log)
            .build()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            app: String::new(),
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8000,
            uds: None,
            fd: None,
            http: CliHttpImpl::Auto,
            ws: CliWsImpl::None,
            lifespan: CliLifespanMode::Auto,
            workers: 1,
            limit_concurrency: None,
            limit_max_requests: None,
            timeout_keep_alive: 5,
            timeout_graceful_shutdown: None,
            ssl_keyfile: None,
            ssl_certfile: None,
            proxy_headers: false,
            root_path: None,
            log_level: "info".to_string(),
            access_log: true,
        }
    }
}

/// Initializes `tracing-subscriber`, mirroring `rama-cli/src/trace.rs`'s
/// `init_default`: an `fmt` layer plus an `EnvFilter` seeded from
/// `--log-level` and overridable via `RUST_LOG`.
pub fn init_tracing(default_directive: impl Into<Directive>) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_directive.into())
                .from_env_lossy(),
        )
        .init();
}
