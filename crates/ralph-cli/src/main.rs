//! `ralph` binary: config assembly, signal wiring, and the run itself.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ralph_acp::AcpAdapter;
use ralph_core::{ToolAdapter, VerboseLogger};
use ralph_orchestrator::RalphOrchestrator;

use crate::cli::Cli;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.build_config()?;

    if cli.dry_run {
        println!("Configuration OK");
        return Ok(());
    }

    // Register adapters in fallback-priority order. ACP is the in-tree
    // backend; other backends plug in through the same trait.
    let adapters: Vec<Arc<dyn ToolAdapter>> = vec![Arc::new(AcpAdapter::new(config.acp.clone()))];

    let verbose = config.verbose;
    let orchestrator = Arc::new(
        RalphOrchestrator::new(config, adapters).context("failed to initialize orchestrator")?,
    );

    let logger = if verbose {
        let logger = VerboseLogger::new(".agent/ralph.log")
            .context("failed to open the verbose log")?;
        orchestrator.set_verbose_logger(logger.clone());
        Some(logger)
    } else {
        None
    };

    install_signal_handlers(Arc::clone(&orchestrator));

    let result = orchestrator.arun().await;

    if let Some(logger) = logger {
        logger.close();
    }

    result.context("orchestration failed")
}

/// SIGINT/SIGTERM trigger the subprocess-first shutdown sequence; the loop
/// then exits cleanly on its own.
#[cfg(unix)]
fn install_signal_handlers(orchestrator: Arc<RalphOrchestrator>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        orchestrator.handle_signal();
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(orchestrator: Arc<RalphOrchestrator>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            orchestrator.handle_signal();
        }
    });
}
