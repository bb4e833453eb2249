//! Listener supervision
//!
//! Keeps the OS event tap in step with the engine's monitoring state and
//! re-installs it after the system disables it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::events::EngineEvent;
use crate::hotkey::{has_accessibility_permission, HotkeyError, HotkeyListener};
use crate::state::EngineInput;

/// The key interception source the supervisor drives
pub trait Interception: Send + Sync {
    /// Install the tap; must be idempotent
    fn start(&self) -> Result<(), HotkeyError>;

    fn stop(&self);

    fn has_permission(&self) -> bool;
}

impl Interception for HotkeyListener {
    fn start(&self) -> Result<(), HotkeyError> {
        HotkeyListener::start(self)
    }

    fn stop(&self) {
        HotkeyListener::stop(self)
    }

    fn has_permission(&self) -> bool {
        has_accessibility_permission()
    }
}

/// Starts, stops and restarts the listener in response to engine events
pub struct ListenerSupervisor {
    listener: Arc<dyn Interception>,
    input_tx: mpsc::Sender<EngineInput>,
    restart_delay: Duration,
}

impl ListenerSupervisor {
    pub fn new(
        listener: Arc<dyn Interception>,
        input_tx: mpsc::Sender<EngineInput>,
        restart_delay: Duration,
    ) -> Self {
        Self {
            listener,
            input_tx,
            restart_delay,
        }
    }

    /// Follow engine events until shutdown
    pub async fn run(
        self,
        mut events: broadcast::Receiver<EngineEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = events.recv() => match event {
                    Ok(EngineEvent::MonitoringStarted) => self.on_started().await,
                    Ok(EngineEvent::MonitoringStopped) => self.stop_listener().await,
                    Ok(EngineEvent::MonitoringLost) => {
                        if !self.recover(&mut shutdown_rx).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "supervisor lagged behind engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.stop_listener().await;
        debug!("listener supervisor stopped");
    }

    async fn on_started(&self) {
        match self.start_listener().await {
            Ok(()) => {}
            Err(HotkeyError::Unsupported) => {
                warn!("continuing without hotkey support on this platform");
            }
            Err(e) => {
                warn!(error = %e, "failed to start hotkey listener");
                let _ = self.input_tx.send(EngineInput::MonitoringLost).await;
            }
        }
    }

    /// Re-install the tap once permission is confirmed; false on shutdown
    async fn recover(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        self.stop_listener().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                _ = shutdown_rx.recv() => return false,
            }

            if !self.listener.has_permission() {
                debug!("waiting for accessibility permission");
                continue;
            }

            match self.start_listener().await {
                Ok(()) => {
                    info!("hotkey listener restarted");
                    let _ = self.input_tx.send(EngineInput::Start).await;
                    return true;
                }
                Err(HotkeyError::Unsupported) => return true,
                Err(e) => warn!(error = %e, "listener restart failed"),
            }
        }
    }

    async fn start_listener(&self) -> Result<(), HotkeyError> {
        let listener = Arc::clone(&self.listener);
        tokio::task::spawn_blocking(move || listener.start())
            .await
            .unwrap_or_else(|e| Err(HotkeyError::ThreadSpawn(e.to_string())))
    }

    async fn stop_listener(&self) {
        let listener = Arc::clone(&self.listener);
        if let Err(e) = tokio::task::spawn_blocking(move || listener.stop()).await {
            warn!(error = %e, "listener stop task failed");
        }
    }
}
