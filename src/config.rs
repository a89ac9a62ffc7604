//! Server configuration (`spec.md` §6 external interfaces): every tunable
//! named for the CLI surface, with the defaults the component sections
//! specify.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::server::flow::{HIGH_WATER, LOW_WATER};

/// `--http` / `--ws` implementation selectors. The core only ships the
/// HTTP/1.1 engine and the upgrade handoff described in `spec.md` §4.9; the
/// other variants are accepted for CLI compatibility and fail fast at
/// startup if selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpImpl {
    #[default]
    Auto,
    H11,
    HttpTools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsImpl {
    Auto,
    #[default]
    None,
    WebSockets,
    Wsproto,
}

/// Lifespan handshake mode, per `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifespanMode {
    #[default]
    Auto,
    On,
    Off,
}

/// Where the server listens, per `spec.md` §6 "Listeners".
#[derive(Debug, Clone)]
pub enum BindTarget {
    Tcp(SocketAddr),
    Unix(PathBuf),
    InheritedFd(std::os::fd::RawFd),
}

impl Default for BindTarget {
    fn default() -> Self {
        Self::Tcp(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8000))
    }
}

/// Full server configuration. Construct with [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: BindTarget,
    pub http_impl: HttpImpl,
    pub ws_impl: WsImpl,
    pub lifespan: LifespanMode,
    pub workers: usize,
    pub limit_concurrency: Option<usize>,
    pub limit_max_requests: Option<u64>,
    pub timeout_keep_alive: Duration,
    pub timeout_notify: Duration,
    pub timeout_graceful_shutdown: Option<Duration>,
    pub ssl_enabled: bool,
    pub proxy_headers: bool,
    pub trusted_hosts: Vec<String>,
    pub root_path: String,
    pub log_level: String,
    pub access_log: bool,
    pub max_header_bytes: usize,
    pub max_pipelined_requests: usize,
    pub high_water: usize,
    pub low_water: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: BindTarget::default(),
            http_impl: HttpImpl::default(),
            ws_impl: WsImpl::default(),
            lifespan: LifespanMode::default(),
            workers: 1,
            limit_concurrency: None,
            limit_max_requests: None,
            timeout_keep_alive: Duration::from_secs(5),
            timeout_notify: Duration::from_secs(30),
            timeout_graceful_shutdown: None,
            ssl_enabled: false,
            proxy_headers: false,
            trusted_hosts: Vec::new(),
            root_path: String::new(),
            log_level: "info".to_string(),
            access_log: true,
            max_header_bytes: 16 * 1024,
            max_pipelined_requests: 20,
            high_water: HIGH_WATER,
            low_water: LOW_WATER,
        }
    }
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Chained builder for [`Config`], mirroring the CLI flags in `spec.md` §6.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn bind(mut self, target: BindTarget) -> Self {
        self.config.bind = target;
        self
    }

    #[must_use]
    pub fn http_impl(mut self, v: HttpImpl) -> Self {
        self.config.http_impl = v;
        self
    }

    #[must_use]
    pub fn ws_impl(mut self, v: WsImpl) -> Self {
        self.config.ws_impl = v;
        self
    }

    #[must_use]
    pub fn lifespan(mut self, v: LifespanMode) -> Self {
        self.config.lifespan = v;
        self
    }

    #[must_use]
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    #[must_use]
    pub fn limit_concurrency(mut self, n: Option<usize>) -> Self {
        self.config.limit_concurrency = n;
        self
    }

    #[must_use]
    pub fn limit_max_requests(mut self, n: Option<u64>) -> Self {
        self.config.limit_max_requests = n;
        self
    }

    #[must_use]
    pub fn timeout_keep_alive(mut self, d: Duration) -> Self {
        self.config.timeout_keep_alive = d;
        self
    }

    #[must_use]
    pub fn timeout_notify(mut self, d: Duration) -> Self {
        self.config.timeout_notify = d;
        self
    }

    #[must_use]
    pub fn timeout_graceful_shutdown(mut self, d: Option<Duration>) -> Self {
        self.config.timeout_graceful_shutdown = d;
        self
    }

    #[must_use]
    pub fn ssl_enabled(mut self, enabled: bool) -> Self {
        self.config.ssl_enabled = enabled;
        self
    }

    #[must_use]
    pub fn proxy_headers(mut self, enabled: bool) -> Self {
        self.config.proxy_headers = enabled;
        self
    }

    #[must_use]
    pub fn trusted_hosts(mut self, hosts: Vec<String>) -> Self {
        self.config.trusted_hosts = hosts;
        self
    }

    #[must_use]
    pub fn root_path(mut self, path: impl Into<String>) -> Self {
        self.config.root_path = path.into();
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    #[must_use]
    pub fn access_log(mut self, enabled: bool) -> Self {
        self.config.access_log = enabled;
        self
    }

    #[must_use]
    pub fn max_header_bytes(mut self, n: usize) -> Self {
        self.config.max_header_bytes = n;
        self
    }

    #[must_use]
    pub fn max_pipelined_requests(mut self, n: usize) -> Self {
        self.config.max_pipelined_requests = n;
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}
