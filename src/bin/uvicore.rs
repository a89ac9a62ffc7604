//! `uvicore` binary entrypoint (`spec.md` §6): parses the CLI surface,
//! wires up `tracing`, and runs the server supervisor to completion.

use std::future::Future;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use uvicore::ai::{BoxError, InboundMessage, OutboundMessage, Scope};
use uvicore::cli::{init_tracing, Cli};
use uvicore::{Application, Receiver, Sender};

/// The application hosted by this build.
///
/// This crate is a server core, not a dynamic application host (there is
/// no Rust equivalent of importing `module:app` from a string); `uvicore`
/// therefore always serves this fixed demo handler. Real deployments embed
/// [`Application`] in their own binary instead of using this one directly.
#[derive(Clone)]
struct DemoApp;

impl Application for DemoApp {
    fn call(
        &self,
        scope: Scope,
        mut receive: Receiver,
        send: Sender,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        async move {
            match scope {
                Scope::Http(_) => {
                    loop {
                        match receive.receive().await {
                            InboundMessage::HttpRequest { more_body: false, .. } => break,
                            InboundMessage::HttpRequest { more_body: true, .. } => {}
                            InboundMessage::HttpDisconnect => return Ok(()),
                            _ => {}
                        }
                    }
                    send.send(OutboundMessage::ResponseStart {
                        status: 200,
                        headers: vec![(
                            "content-type".into(),
                            "text/plain; charset=utf-8".into(),
                        )],
                    })
                    .await?;
                    send.send(OutboundMessage::ResponseBody {
                        body: "hello from uvicore\n".into(),
                        more_body: false,
                    })
                    .await?;
                    Ok(())
                }
                Scope::WebSocket(_) => {
                    if let InboundMessage::WebSocketConnect = receive.receive().await {
                        send.send(OutboundMessage::WebSocketClose { code: 1000 }).await?;
                    }
                    Ok(())
                }
                Scope::Lifespan(_) => loop {
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
                },
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = cli
        .log_level
        .parse::<tracing::metadata::LevelFilter>()
        .unwrap_or(tracing::metadata::LevelFilter::INFO);
    init_tracing(default_level);

    if !cli.app.is_empty() {
        info!("application import reference {:?} noted (this build serves its built-in demo application)", cli.app);
    }

    let cfg = cli.to_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start the tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(uvicore::server::serve(DemoApp, cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_lifespan_startup_failed() => {
            error!("lifespan startup failed: {e}");
            ExitCode::from(3)
        }
        Err(e) => {
            error!("server error: {e}");
            ExitCode::from(1)
        }
    }
}
