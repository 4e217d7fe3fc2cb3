//! Process shutdown watcher.
//!
//! Listens for SIGINT/SIGTERM and fans the signal out through a
//! [`CancellationToken`], so the HTTP server and every background task
//! (price refresher, cache maintenance) wind down together.

use tokio_util::sync::CancellationToken;

/// Watches termination signals and exposes cancellation tokens.
pub struct SigDown {
    root: CancellationToken,
}

impl SigDown {
    /// Install the signal handlers and start watching.
    pub fn try_new() -> std::io::Result<Self> {
        let root = CancellationToken::new();
        let trigger = root.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                    _ = sigint.recv() => tracing::info!("SIGINT received"),
                }
                trigger.cancel();
            });
        }
        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received");
                }
                trigger.cancel();
            });
        }

        Ok(SigDown { root })
    }

    /// A child token cancelled when the process is asked to stop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.child_token()
    }
}
