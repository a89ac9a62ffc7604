//! Process supervisor (C8): binds the listener, runs the lifespan
//! handshake, accepts connections, and drives graceful shutdown, per
//! `spec.md` §4.8.
//!
//! Grounded on the teacher's own `tokio_graceful::Shutdown` idiom: one
//! `spawn_task_fn` for the accept loop, one nested `spawn_task_fn` per
//! accepted connection (so `shutdown_with_limit` genuinely waits on
//! in-flight connections, bounded by the configured grace period), and a
//! `Shutdown::new` trigger future that resolves on either the default OS
//! signal or `limit_max_requests` being reached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_graceful::{default_signal, Shutdown, ShutdownGuard};
use tracing::{info, warn};

use crate::ai::Application;
use crate::common::date;
use crate::config::{BindTarget, Config};
use crate::error::Result;
use crate::lifespan::LifespanCoordinator;

use super::connection::Connection;
use super::listener::Listener;

async fn bind(cfg: &Config) -> Result<Listener> {
    let listener = match &cfg.bind {
        BindTarget::Tcp(addr) => Listener::bind_tcp(*addr).await?,
        BindTarget::Unix(path) => Listener::bind_unix(path)?,
        // SAFETY: the caller (`--fd`, per `spec.md` §6) asserts the fd is an
        // open, listening TCP socket handed down by a process supervisor.
        BindTarget::InheritedFd(fd) => unsafe { Listener::from_inherited_fd(*fd)? },
    };
    Ok(listener)
}

/// Binds `cfg.bind`, runs the lifespan startup handshake, and serves `app`
/// until a shutdown signal arrives or `cfg.limit_max_requests` is reached,
/// draining in-flight connections (bounded by
/// `cfg.timeout_graceful_shutdown`, if set) before running the lifespan
/// shutdown handshake and returning.
///
/// Propagates an error if the listener fails to bind, or if the lifespan
/// handshake fails in `LifespanMode::On` (`spec.md` §6 exit code 3).
pub async fn serve<A: Application>(app: A, cfg: Config) -> Result<()> {
    let listener = bind(&cfg).await?;
    match listener.local_addr() {
        Ok(addr) => info!("listening on {addr}"),
        Err(e) => warn!("bound listener but could not query its local address: {e}"),
    }

    let mut lifespan = LifespanCoordinator::new(cfg.lifespan);
    lifespan.startup(app.clone()).await?;

    let total_requests = Arc::new(AtomicU64::new(0));
    let max_requests_reached = Arc::new(Notify::new());

    let shutdown = Shutdown::new({
        let max_requests_reached = Arc::clone(&max_requests_reached);
        async move {
            tokio::select! {
                _ = default_signal() => {
                    info!("received shutdown signal");
                }
                _ = max_requests_reached.notified() => {
                    info!("limit_max_requests reached, shutting down");
                }
            }
        }
    });

    shutdown.spawn_task_fn({
        let app = app.clone();
        let cfg = cfg.clone();
        let total_requests = Arc::clone(&total_requests);
        move |guard| accept_loop(listener, app, cfg, guard, total_requests)
    });

    shutdown.spawn_task_fn({
        let limit = cfg.limit_max_requests;
        let total_requests = Arc::clone(&total_requests);
        move |guard| tick(guard, limit, total_requests, max_requests_reached)
    });

    match cfg.timeout_graceful_shutdown {
        Some(limit) => {
            if shutdown.shutdown_with_limit(limit).await.is_err() {
                warn!("graceful shutdown exceeded {limit:?}, remaining connections were dropped");
            }
        }
        None => shutdown.shutdown().await,
    }

    lifespan.shutdown().await;
    Ok(())
}

async fn accept_loop<A: Application>(
    listener: Listener,
    app: A,
    cfg: Config,
    guard: ShutdownGuard,
    total_requests: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            biased;
            _ = guard.cancelled() => {
                info!("accept loop stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(socket) => {
                        let app = app.clone();
                        let cfg = cfg.clone();
                        let total_requests = Arc::clone(&total_requests);
                        guard.clone().spawn_task_fn(move |guard| {
                            serve_connection(socket, app, cfg, guard, total_requests)
                        });
                    }
                    Err(e) => warn!("failed to accept connection: {e}"),
                }
            }
        }
    }
}

async fn serve_connection<A: Application>(
    socket: super::listener::Socket,
    app: A,
    cfg: Config,
    guard: ShutdownGuard,
    total_requests: Arc<AtomicU64>,
) {
    // Holding `guard` for the lifetime of this future (it was handed to us
    // by the caller's `spawn_task_fn`) is what makes this connection count
    // towards `shutdown_with_limit`'s drain wait; no mid-flight
    // cancellation is wired in here, so it runs to its own natural
    // keep-alive/EOF completion and the grace period is the backstop that
    // forcibly drops whatever hasn't finished in time.
    let _guard = guard;
    Connection::new(socket, app, &cfg, Some(total_requests)).run().await;
}

/// 1 Hz tick, per `spec.md` §4.8: refreshes the Date header cache and
/// watches the process-wide request counter against `limit_max_requests`.
async fn tick(
    guard: ShutdownGuard,
    limit: Option<u64>,
    total_requests: Arc<AtomicU64>,
    max_requests_reached: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = guard.cancelled() => return,
            _ = interval.tick() => {
                date::update();
                if let Some(limit) = limit {
                    if total_requests.load(Ordering::Relaxed) >= limit {
                        max_requests_reached.notify_one();
                        return;
                    }
                }
            }
        }
    }
}
