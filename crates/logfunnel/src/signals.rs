//! Process signals mapped onto a cancellation token.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `cancel` on SIGINT or SIGTERM.
///
/// Returns early if the token is cancelled by someone else first. The
/// signal only cancels the token; shutdown itself is left to the loops
/// watching it.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        signal = shutdown_signal() => {
            info!(signal = signal, "received shutdown signal");
            cancel.cancel();
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return interrupt().await;
        }
    };
    tokio::select! {
        name = interrupt() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    interrupt().await
}

async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
