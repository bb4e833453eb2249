//! Global hotkey listener
//!
//! Owns the OS event tap thread and forwards every decoded key transition
//! into the engine channel. Starting is idempotent and gated on the
//! Accessibility permission; a tap the system disabled is torn down with
//! `stop()` and installed again with `start()`.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[cfg(target_os = "macos")]
use super::tap::TapThread;
use crate::state::EngineInput;

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("accessibility permission has not been granted")]
    PermissionDenied,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for event tap")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("global key interception is not supported on this platform")]
    Unsupported,
}

/// Whether this process may observe global key events
pub fn has_accessibility_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        super::tap::has_accessibility_permission()
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

/// Global hotkey listener feeding the engine
pub struct HotkeyListener {
    input_tx: mpsc::Sender<EngineInput>,
    #[cfg(target_os = "macos")]
    thread: Mutex<Option<TapThread>>,
    #[cfg(not(target_os = "macos"))]
    thread: Mutex<Option<()>>,
}

impl HotkeyListener {
    pub fn new(input_tx: mpsc::Sender<EngineInput>) -> Self {
        Self {
            input_tx,
            thread: Mutex::new(None),
        }
    }

    /// Install the event tap on a dedicated thread.
    ///
    /// Returns `Ok` without doing anything if the tap is already running.
    #[cfg(target_os = "macos")]
    pub fn start(&self) -> Result<(), HotkeyError> {
        let mut thread = self.thread.lock();
        if thread.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("hotkey listener already running");
            return Ok(());
        }
        if let Some(finished) = thread.take() {
            finished.stop();
        }

        if !has_accessibility_permission() {
            return Err(HotkeyError::PermissionDenied);
        }

        *thread = Some(TapThread::spawn(self.input_tx.clone())?);
        info!("hotkey listener started");
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self) -> Result<(), HotkeyError> {
        debug!(closed = self.input_tx.is_closed(), "no event tap on this platform");
        Err(HotkeyError::Unsupported)
    }

    /// Remove the event tap and join the listener thread
    pub fn stop(&self) {
        let thread = self.thread.lock().take();
        #[cfg(target_os = "macos")]
        {
            if let Some(thread) = thread {
                thread.stop();
                info!("hotkey listener stopped");
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = thread;
        }
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}
