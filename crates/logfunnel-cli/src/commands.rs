//! Command implementations.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use logfunnel::{
    Aggregator, LoggerInfo, PipeExit, PipeSummary, Router, TcpProducer, TransportEndpoint,
    serve_pipe, signals,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs a collector from `config` until a signal stops it.
///
/// Blocks the calling thread; the collector runs on its own worker.
pub fn serve(config: &Path) -> Result<()> {
    let logger_info = LoggerInfo::from_file(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let mut aggregator = Aggregator::new(logger_info).with_signal_handling(true);
    aggregator.start().context("collector failed to start")?;

    if let Some(resolved) = aggregator.logger_info() {
        info!(
            name = %resolved.name,
            logdir = %resolved.logdir.display(),
            transport = ?resolved.transport,
            "collector ready"
        );
    }
    aggregator.wait().context("collector failed while running")?;
    Ok(())
}

/// Writes `config` with every default applied to `out`.
pub fn info<W: Write>(config: &Path, out: &mut W) -> Result<()> {
    let logger_info = LoggerInfo::from_file(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    writeln!(out, "{}", logger_info.to_json()?)?;
    Ok(())
}

/// Returns true if a pipe channel ended in a way its writer asked for.
pub fn ended_cleanly(summary: &PipeSummary) -> bool {
    !matches!(summary.exit, PipeExit::ReadError(_) | PipeExit::DeliveryFailed(_))
}

/// Serves the agent's stdin.
///
/// A TCP transport relays every record to the collector and stops at the
/// first record the collector cannot take; any other transport routes
/// locally into the configured log directory.
pub async fn agent(handler_id: &str, log_info: &str) -> Result<PipeSummary> {
    let logger_info = LoggerInfo::from_json(log_info).context("invalid --log-info")?;
    let cancel = CancellationToken::new();
    tokio::spawn(signals::cancel_on_signal(cancel.clone()));

    let stdin = tokio::io::stdin();
    let summary = match &logger_info.transport {
        TransportEndpoint::Tcp { host, port } => {
            let producer = TcpProducer::connect((host.as_str(), *port))
                .await
                .with_context(|| format!("failed to connect to {host}:{port}"))?;
            info!(handler_id = %handler_id, peer = %producer.peer_addr(), "agent relaying");
            let summary = serve_pipe(stdin, &producer, cancel).await;
            if let Err(e) = producer.close().await {
                warn!(handler_id = %handler_id, error = %e, "failed to close relay connection");
            }
            summary
        }
        _ => {
            let router = Router::new(&logger_info)?;
            info!(handler_id = %handler_id, logdir = %router.logdir().display(), "agent routing locally");
            let summary = serve_pipe(stdin, &router, cancel).await;
            router.close();
            summary
        }
    };

    match &summary.exit {
        PipeExit::ReadError(reason) => {
            warn!(handler_id = %handler_id, reason = %reason, "agent input failed");
        }
        PipeExit::DeliveryFailed(reason) => {
            warn!(handler_id = %handler_id, reason = %reason, "agent relay broken");
        }
        exit => info!(
            handler_id = %handler_id,
            exit = ?exit,
            delivered = summary.stats.delivered,
            dropped = summary.stats.dropped,
            "agent finished"
        ),
    }
    Ok(summary)
}
