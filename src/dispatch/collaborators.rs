//! Collaborator interfaces the dispatcher routes side effects through

use std::path::{Path, PathBuf};

use crate::bindings::{AppTarget, ScriptSource};

/// Errors surfaced while activating a target
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("application not found: {0}")]
    AppNotFound(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script failed: {0}")]
    ScriptFailed(String),

    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// A running application instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub pid: i32,
    pub name: String,
    pub bundle_id: Option<String>,
}

impl RunningApp {
    /// Whether this instance is the app a target refers to
    pub fn matches(&self, target: &AppTarget) -> bool {
        match (&target.bundle_id, &self.bundle_id) {
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            _ => target
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(&self.name)),
        }
    }
}

/// Application activation collaborator
pub trait Workspace: Send + Sync {
    /// Resolve a running instance of `app`
    fn find_running(&self, app: &AppTarget) -> Option<RunningApp>;

    fn frontmost_pid(&self) -> Option<i32>;

    fn launch(&self, app: &AppTarget) -> Result<(), DispatchError>;

    /// Bring the app to front without choosing a window
    fn activate(&self, pid: i32) -> Result<(), DispatchError>;

    fn hide(&self, pid: i32) -> Result<(), DispatchError>;

    fn open_url(&self, url: &str) -> Result<(), DispatchError>;

    fn open_file(&self, path: &Path) -> Result<(), DispatchError>;
}

/// Process/script execution collaborator
pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &ScriptSource) -> Result<(), DispatchError>;
}

/// Clipboard/paste collaborator
pub trait Clipboard: Send + Sync {
    /// Place `text` on the clipboard and paste it into the focused app
    fn paste(&self, text: &str) -> Result<(), DispatchError>;
}

/// Notification delivery collaborator
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}
