//! Lifespan coordinator (C7): the once-per-process startup/shutdown
//! handshake with the hosted application, per `spec.md` §4.7.

use std::error::Error as StdError;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ai::{Application, InboundMessage, LifespanScope, OutboundMessage, Receiver, Scope, Sender};
use crate::config::LifespanMode;
use crate::error::{Error, Result};

type BoxError = Box<dyn StdError + Send + Sync>;

const CHANNEL_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    StartupPending,
    Ready,
    ShutdownPending,
    Closed,
}

/// Outcome of attempting the startup handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartupOutcome {
    /// The handshake was skipped entirely (`LifespanMode::Off`).
    Skipped,
    /// The application completed startup successfully.
    Ready,
    /// The application raised (or returned without responding) before
    /// completing startup, and the mode tolerates it (`auto`).
    Unsupported,
}

/// Drives one process-scoped lifespan exchange, per `spec.md` §4.7.
pub(crate) struct LifespanCoordinator {
    mode: LifespanMode,
    phase: Phase,
    error_occurred: bool,
    running: Option<Running>,
}

struct Running {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    task: JoinHandle<std::result::Result<(), BoxError>>,
}

impl LifespanCoordinator {
    pub(crate) fn new(mode: LifespanMode) -> Self {
        Self {
            mode,
            phase: Phase::Idle,
            error_occurred: false,
            running: None,
        }
    }

    pub(crate) fn error_occurred(&self) -> bool {
        self.error_occurred
    }

    /// Runs the startup handshake (`spec.md` §4.7 step 1-2). Must be
    /// called before the supervisor starts accepting connections.
    pub(crate) async fn startup<A: Application>(&mut self, app: A) -> Result<StartupOutcome> {
        if self.mode == LifespanMode::Off {
            self.phase = Phase::Ready;
            return Ok(StartupOutcome::Skipped);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let receive = Receiver::new(inbound_rx);
        let send = Sender::new(outbound_tx);

        let mut task = tokio::spawn(async move {
            app.call(Scope::Lifespan(LifespanScope::default()), receive, send)
                .await
        });

        self.phase = Phase::StartupPending;
        let _ = inbound_tx.send(InboundMessage::LifespanStartup);

        let outcome = tokio::select! {
            biased;
            msg = outbound_rx.recv() => self.handle_startup_message(msg),
            joined = &mut task => self.handle_startup_task_end(joined),
        };

        match outcome {
            Ok(StartupOutcome::Ready) => {
                self.phase = Phase::Ready;
                self.running = Some(Running { inbound_tx, outbound_rx, task });
                Ok(StartupOutcome::Ready)
            }
            Ok(StartupOutcome::Unsupported) => {
                warn!("application did not respond to lifespan.startup before returning; continuing without lifespan support");
                self.phase = Phase::Closed;
                Ok(StartupOutcome::Unsupported)
            }
            Ok(StartupOutcome::Skipped) => unreachable!("Off mode handled above"),
            Err(e) => {
                self.error_occurred = true;
                self.phase = Phase::Closed;
                Err(e)
            }
        }
    }

    fn handle_startup_message(&mut self, msg: Option<OutboundMessage>) -> Result<StartupOutcome> {
        match msg {
            Some(OutboundMessage::LifespanStartupComplete) => Ok(StartupOutcome::Ready),
            Some(OutboundMessage::LifespanStartupFailed { message }) => {
                self.error_occurred = true;
                match self.mode {
                    LifespanMode::On => Err(Error::new_lifespan_startup_failed(message)),
                    LifespanMode::Auto => {
                        warn!("lifespan.startup.failed in auto mode, continuing without lifespan support: {message}");
                        Ok(StartupOutcome::Unsupported)
                    }
                    LifespanMode::Off => unreachable!(),
                }
            }
            Some(_) | None => Ok(StartupOutcome::Unsupported),
        }
    }

    fn handle_startup_task_end(
        &mut self,
        joined: std::result::Result<std::result::Result<(), BoxError>, tokio::task::JoinError>,
    ) -> Result<StartupOutcome> {
        match joined {
            Ok(Ok(())) => Ok(StartupOutcome::Unsupported),
            Ok(Err(e)) => match self.mode {
                LifespanMode::On => Err(Error::new_lifespan_startup_failed(e.to_string())),
                _ => {
                    warn!("lifespan application raised before responding to startup: {e}");
                    Ok(StartupOutcome::Unsupported)
                }
            },
            Err(e) => match self.mode {
                LifespanMode::On => Err(Error::new_lifespan_startup_failed(e.to_string())),
                _ => Ok(StartupOutcome::Unsupported),
            },
        }
    }

    /// Runs the shutdown handshake (`spec.md` §4.7 step 3). No-op if
    /// startup never completed (auto-unsupported or `off`).
    pub(crate) async fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        self.phase = Phase::ShutdownPending;
        if running.inbound_tx.send(InboundMessage::LifespanShutdown).is_err() {
            self.phase = Phase::Closed;
            return;
        }

        tokio::select! {
            biased;
            msg = running.outbound_rx.recv() => {
                match msg {
                    Some(OutboundMessage::LifespanShutdownComplete) => {
                        info!("lifespan shutdown complete");
                    }
                    Some(OutboundMessage::LifespanShutdownFailed { message }) => {
                        error!("lifespan.shutdown.failed: {message}");
                        self.error_occurred = true;
                    }
                    _ => {}
                }
            }
            joined = &mut running.task => {
                if let Ok(Err(e)) = joined {
                    error!("lifespan application errored during shutdown: {e}");
                    self.error_occurred = true;
                }
            }
        }
        self.phase = Phase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Receiver as AiReceiver, Sender as AiSender};
    use std::future::Future;

    #[derive(Clone)]
    struct ImmediateReady;

    impl Application for ImmediateReady {
        fn call(
            &self,
            _scope: Scope,
            mut receive: AiReceiver,
            send: AiSender,
        ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send {
            async move {
                loop {
                    match receive.receive().await {
                        InboundMessage::LifespanStartup => {
                            send.send(OutboundMessage::LifespanStartupComplete).await?;
                        }
                        InboundMessage::LifespanShutdown => {
                            send.send(OutboundMessage::LifespanShutdownComplete).await?;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    #[derive(Clone)]
    struct RaisesBeforeStartup;

    impl Application for RaisesBeforeStartup {
        fn call(
            &self,
            _scope: Scope,
            _receive: AiReceiver,
            _send: AiSender,
        ) -> impl Future<Output = std::result::Result<(), BoxError>> + Send {
            async move { Err("boom".into()) }
        }
    }

    #[tokio::test]
    async fn auto_mode_completes_startup_and_shutdown() {
        let mut coordinator = LifespanCoordinator::new(LifespanMode::Auto);
        let outcome = coordinator.startup(ImmediateReady).await.unwrap();
        assert_eq!(outcome, StartupOutcome::Ready);
        coordinator.shutdown().await;
        assert!(!coordinator.error_occurred());
    }

    #[tokio::test]
    async fn auto_mode_tolerates_unsupported_lifespan() {
        let mut coordinator = LifespanCoordinator::new(LifespanMode::Auto);
        let outcome = coordinator.startup(RaisesBeforeStartup).await.unwrap();
        assert_eq!(outcome, StartupOutcome::Unsupported);
    }

    #[tokio::test]
    async fn on_mode_aborts_on_unsupported_lifespan() {
        let mut coordinator = LifespanCoordinator::new(LifespanMode::On);
        let result = coordinator.startup(RaisesBeforeStartup).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn off_mode_skips_handshake() {
        let mut coordinator = LifespanCoordinator::new(LifespanMode::Off);
        let outcome = coordinator.startup(RaisesBeforeStartup).await.unwrap();
        assert_eq!(outcome, StartupOutcome::Skipped);
    }
}
