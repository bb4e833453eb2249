//! Signal handling for graceful shutdown

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::debug;

/// Handles shutdown signals (SIGTERM, SIGINT) and fans them out to tasks
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver that resolves once shutdown is triggered
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber
    pub fn trigger(&self) {
        let count = self.tx.send(()).unwrap_or(0);
        debug!(subscribers = count, "shutdown triggered");
    }

    /// Wait for a shutdown signal, then notify subscribers
    pub async fn wait(&self) {
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt())
            .expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
        }

        self.trigger();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
