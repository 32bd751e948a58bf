//! Signal-driven job cancellation

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Root token for a job, cancelled on SIGTERM or SIGINT
///
/// If the handlers cannot be installed the token is still returned; the
/// job then runs without signal-driven cancellation.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    let _ = tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(err), _) | (_, Err(err)) => {
                    warn!("Cannot install signal handlers: {}", err);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, cancelling the job"),
            _ = sigint.recv() => info!("Received SIGINT, cancelling the job"),
        }
        trigger.cancel();
    });

    token
}
