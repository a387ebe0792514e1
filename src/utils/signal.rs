//! Shutdown signal handling
//!
//! SIGTERM and SIGINT are turned into cancellation of the session token;
//! the transport loop observes it on its next iteration and teardown then
//! runs as for any other exit.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for SIGTERM, SIGINT or Ctrl+C
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to register signal handlers: {}", e);
                    signal::ctrl_c().await.ok();
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, closing the tunnel"),
            _ = sigint.recv() => info!("Received SIGINT, closing the tunnel"),
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, closing the tunnel"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    }
}

/// Cancel `token` once a shutdown signal arrives
///
/// Returns early, without cancelling, if the token is cancelled elsewhere.
pub async fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_shutdown_signal() => token.cancel(),
        _ = token.cancelled() => {}
    }
}
