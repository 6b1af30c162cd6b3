//! Wrapper mode: serve MCP to the host over stdio, gated on approvals.

use super::cli::Cli;
use crate::downstream::{self, DownstreamPeer};
use crate::facade::WrapperService;
use crate::host_transport::StdioHostTransport;
use crate::pipeline::ResponsePipeline;
use crate::session::WrapperSession;
use protector_core::{ApprovalStore, QuarantineStore};
use protector_guardrails::{GuardrailProvider, ProviderRegistry};
use rmcp::ServiceExt;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::mpsc};
use tracing::info;

pub async fn run_wrapper_mode(cli: Cli) -> ExitCode {
    let Some(target) = cli.downstream_target() else {
        eprintln!(
            "No downstream server selected. Pass one of --command, --command-args, --url or \
             --sse-url. See --help."
        );
        return ExitCode::from(1);
    };

    let provider: Option<Arc<dyn GuardrailProvider>> = match &cli.guardrail_provider {
        None => None,
        Some(name) => {
            let registry = ProviderRegistry::with_builtins();
            match registry.get(name) {
                Some(provider) => Some(provider),
                None => {
                    eprintln!(
                        "Unknown guardrail provider '{}'. Registered providers: {}",
                        name,
                        registry.names().join(", ")
                    );
                    return ExitCode::from(1);
                }
            }
        }
    };

    if std::io::stdin().is_terminal() {
        eprintln!("mcp-context-protector speaks MCP over stdio and cannot run interactively.");
        eprintln!("Launch it from an MCP host, or use --review-server / --review-quarantine.");
        return ExitCode::from(1);
    }

    let identity = target.identity();
    info!(identity = %identity, "starting wrapper");

    let approvals: Arc<dyn ApprovalStore> = Arc::new(cli.approval_store());
    let quarantine: Arc<dyn QuarantineStore> = Arc::new(cli.quarantine_store());

    let (events_tx, events_rx) = mpsc::channel(16);
    let handle = match downstream::connect(&target, events_tx).await {
        Ok(handle) => handle,
        Err(error) => {
            tracing::error!(%error, "downstream unreachable at startup");
            eprintln!("Failed to reach downstream server: {error}");
            return ExitCode::from(2);
        }
    };
    info!(server = handle.server_name(), "connected to downstream server");

    let session = match WrapperSession::initialize(
        identity.clone(),
        Arc::new(handle) as Arc<dyn DownstreamPeer>,
        approvals,
    )
    .await
    {
        Ok(session) => Arc::new(session),
        Err(error) => {
            tracing::error!(%error, "downstream refused initial snapshot");
            eprintln!("Failed to fetch downstream configuration: {error}");
            return ExitCode::from(2);
        }
    };
    session.spawn_event_loop(events_rx);

    let pipeline = Arc::new(ResponsePipeline::new(
        identity,
        provider,
        quarantine.clone(),
        cli.ansi_mode(),
        cli.scan_timeout(),
    ));
    let service = WrapperService::new(session.clone(), pipeline, quarantine, cli.ansi_mode());

    let running = match service.serve(StdioHostTransport::new_stdio()).await {
        Ok(running) => running,
        Err(error) => {
            tracing::error!(%error, "failed to start host session");
            eprintln!("Failed to start MCP session with the host: {error}");
            return ExitCode::from(1);
        }
    };

    // Graceful shutdown on SIGINT/SIGTERM: cancel pending downstream
    // forwards, give the transport a moment to flush, then exit.
    let shutdown_cancel = session.cancellation();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
                        .expect("failed to install SIGTERM handler");
                    term.recv().await;
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("received SIGTERM, shutting down");
            }
        }
        shutdown_cancel.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        std::process::exit(0);
    });

    match running.waiting().await {
        Ok(reason) => {
            info!(?reason, "host session ended");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "host session failed");
            ExitCode::from(1)
        }
    }
}
