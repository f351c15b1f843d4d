// Shutdown coordination: OS signals to a single cancellation broadcast

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Converts termination signals into one process-wide cancellation.
///
/// Cloning shares the same token; triggering is idempotent and the token is
/// never reset.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    triggered: Arc<AtomicBool>,
    grace_period: Duration,
}

impl ShutdownController {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    /// Token observed by every job runner and the exposition server
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Upper bound on the drain once shutdown has been requested
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Request shutdown. Returns `true` only for the call that flipped the token.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task translating termination signals into [`trigger`](Self::trigger).
    ///
    /// Signals received after the first one are logged and otherwise ignored.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = wait_for_shutdown_signal().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }

                if controller.trigger() {
                    info!(
                        grace_period_seconds = controller.grace_period.as_secs(),
                        "Shutdown signal received, initiating graceful shutdown"
                    );
                } else {
                    warn!("Shutdown already in progress, signal ignored");
                }
            }
        })
    }
}

/// Waits for SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
