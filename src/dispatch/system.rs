//! Default collaborator implementations backed by the host system

use std::path::Path;
use std::process::Command;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::collaborators::{
    Clipboard, DispatchError, Notifier, RunningApp, ScriptRunner, Workspace,
};
use crate::bindings::{AppTarget, ScriptSource};

/// Workspace backed by NSWorkspace on macOS and the `open` crate elsewhere
#[derive(Debug, Default)]
pub struct SystemWorkspace;

fn open_detached(target: &str) -> Result<(), DispatchError> {
    open::that_detached(target).map_err(|source| DispatchError::Open {
        target: target.to_string(),
        source,
    })
}

/// Run a launcher command to completion; a non-zero exit means the app
/// could not be resolved
#[cfg(any(target_os = "macos", test))]
fn run_launcher(command: &mut Command, app: &str) -> Result<(), DispatchError> {
    let status = command
        .status()
        .map_err(|_| DispatchError::AppNotFound(app.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        debug!(app, %status, "launcher exited with failure");
        Err(DispatchError::AppNotFound(app.to_string()))
    }
}

#[cfg(target_os = "macos")]
fn launch_by_identity(app: &AppTarget) -> Result<(), DispatchError> {
    let mut command = Command::new("open");
    match (&app.bundle_id, &app.name) {
        (Some(bundle_id), _) => command.args(["-b", bundle_id.as_str()]),
        (None, Some(name)) => command.args(["-a", name.as_str()]),
        (None, None) => return Err(DispatchError::AppNotFound(app.display_name().to_string())),
    };
    run_launcher(&mut command, app.display_name())
}

#[cfg(not(target_os = "macos"))]
fn launch_by_identity(app: &AppTarget) -> Result<(), DispatchError> {
    let Some(name) = &app.name else {
        return Err(DispatchError::AppNotFound(app.display_name().to_string()));
    };
    let mut child = Command::new(name)
        .spawn()
        .map_err(|_| DispatchError::AppNotFound(name.clone()))?;
    // The app itself is the child here, so reap it off the blocking pool
    std::thread::spawn(move || {
        if let Err(e) = child.wait() {
            warn!(error = %e, "failed to reap launched application");
        }
    });
    Ok(())
}

impl Workspace for SystemWorkspace {
    #[cfg(target_os = "macos")]
    fn find_running(&self, app: &AppTarget) -> Option<RunningApp> {
        super::macos::running_apps()
            .into_iter()
            .find(|running| running.matches(app))
    }

    #[cfg(not(target_os = "macos"))]
    fn find_running(&self, _app: &AppTarget) -> Option<RunningApp> {
        None
    }

    #[cfg(target_os = "macos")]
    fn frontmost_pid(&self) -> Option<i32> {
        super::macos::frontmost_pid()
    }

    #[cfg(not(target_os = "macos"))]
    fn frontmost_pid(&self) -> Option<i32> {
        None
    }

    fn launch(&self, app: &AppTarget) -> Result<(), DispatchError> {
        if let Some(path) = &app.path {
            if !path.exists() {
                return Err(DispatchError::AppNotFound(path.display().to_string()));
            }
            return open_detached(&path.to_string_lossy());
        }

        info!(app = app.display_name(), "launching application");
        launch_by_identity(app)
    }

    #[cfg(target_os = "macos")]
    fn activate(&self, pid: i32) -> Result<(), DispatchError> {
        if super::macos::activate(pid) {
            Ok(())
        } else {
            Err(DispatchError::AppNotFound(format!("pid {pid}")))
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn activate(&self, _pid: i32) -> Result<(), DispatchError> {
        Err(DispatchError::Unsupported("app activation"))
    }

    #[cfg(target_os = "macos")]
    fn hide(&self, pid: i32) -> Result<(), DispatchError> {
        if super::macos::hide(pid) {
            Ok(())
        } else {
            Err(DispatchError::AppNotFound(format!("pid {pid}")))
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn hide(&self, _pid: i32) -> Result<(), DispatchError> {
        Err(DispatchError::Unsupported("app hiding"))
    }

    fn open_url(&self, url: &str) -> Result<(), DispatchError> {
        debug!(url, "opening url");
        open_detached(url)
    }

    fn open_file(&self, path: &Path) -> Result<(), DispatchError> {
        if !path.exists() {
            return Err(DispatchError::FileNotFound(path.to_path_buf()));
        }
        debug!(path = %path.display(), "opening file");
        open_detached(&path.to_string_lossy())
    }
}

/// Runs scripts as child processes and waits for them to exit
#[derive(Debug, Default)]
pub struct ShellScriptRunner;

impl ScriptRunner for ShellScriptRunner {
    fn run(&self, script: &ScriptSource) -> Result<(), DispatchError> {
        let mut command = match script {
            ScriptSource::Inline { command } => {
                let mut sh = Command::new("sh");
                sh.arg("-c").arg(command);
                sh
            }
            ScriptSource::File { path, args } => {
                if !path.exists() {
                    return Err(DispatchError::FileNotFound(path.clone()));
                }
                let mut cmd = Command::new(path);
                cmd.args(args);
                cmd
            }
        };

        let status = command
            .status()
            .map_err(|e| DispatchError::ScriptFailed(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(DispatchError::ScriptFailed(status.to_string()))
        }
    }
}

/// Clipboard backed by `arboard`; posts Cmd+V on macOS
#[derive(Default)]
pub struct SystemClipboard {
    // Kept alive so X11 selection ownership outlives a single paste
    inner: Mutex<Option<arboard::Clipboard>>,
}

impl Clipboard for SystemClipboard {
    fn paste(&self, text: &str) -> Result<(), DispatchError> {
        let mut guard = self.inner.lock();
        if guard.is_none() {
            *guard = Some(
                arboard::Clipboard::new().map_err(|e| DispatchError::Clipboard(e.to_string()))?,
            );
        }
        if let Some(clipboard) = guard.as_mut() {
            clipboard
                .set_text(text.to_string())
                .map_err(|e| DispatchError::Clipboard(e.to_string()))?;
        }
        drop(guard);

        post_paste_keystroke()
    }
}

#[cfg(target_os = "macos")]
fn post_paste_keystroke() -> Result<(), DispatchError> {
    use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation};
    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

    const KEY_V: u16 = 9;

    let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|_| DispatchError::Clipboard("failed to create event source".to_string()))?;
    for key_down in [true, false] {
        let event = CGEvent::new_keyboard_event(source.clone(), KEY_V, key_down)
            .map_err(|_| DispatchError::Clipboard("failed to create paste event".to_string()))?;
        event.set_flags(CGEventFlags::CGEventFlagCommand);
        event.post(CGEventTapLocation::HID);
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn post_paste_keystroke() -> Result<(), DispatchError> {
    debug!("paste keystroke not synthesized on this platform, text left on clipboard");
    Ok(())
}

/// Notifier that only logs; delivery belongs to the UI
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        warn!(title, message, "notification");
    }
}
