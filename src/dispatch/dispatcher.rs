//! Activation dispatcher: turns a resolved binding into its side effect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::collaborators::{Clipboard, DispatchError, Notifier, ScriptRunner, Workspace};
use super::BindingExecutor;
use crate::bindings::{AppBehavior, AppTarget, Binding, MacroStep, Target};
use crate::events::EngineEvent;
use crate::windows::WindowFocusResolver;

/// Executes binding targets off the input path
#[derive(Clone)]
pub struct ActivationDispatcher {
    workspace: Arc<dyn Workspace>,
    scripts: Arc<dyn ScriptRunner>,
    clipboard: Arc<dyn Clipboard>,
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn WindowFocusResolver>,
    focus_across_spaces: bool,
    /// Last window focused by cycling, per pid
    cycle_cursor: Arc<Mutex<HashMap<i32, u32>>>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl ActivationDispatcher {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        scripts: Arc<dyn ScriptRunner>,
        clipboard: Arc<dyn Clipboard>,
        notifier: Arc<dyn Notifier>,
        resolver: Arc<dyn WindowFocusResolver>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            workspace,
            scripts,
            clipboard,
            notifier,
            resolver,
            focus_across_spaces: true,
            cycle_cursor: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    /// Allow focusing a specific window when the app lives on another space
    pub fn with_focus_across_spaces(mut self, enabled: bool) -> Self {
        self.focus_across_spaces = enabled;
        self
    }

    /// Run the binding's target on the blocking pool.
    ///
    /// Returns immediately; failures are reported through the notifier and
    /// a `BindingFailed` event.
    pub fn dispatch(&self, binding: &Binding) -> JoinHandle<()> {
        let this = self.clone();
        let binding = binding.clone();
        tokio::task::spawn_blocking(move || {
            let kind = binding.target.kind();
            debug!(binding_id = %binding.id, ?kind, "activating binding");
            if let Err(e) = this.activate(&binding.target) {
                warn!(binding_id = %binding.id, ?kind, error = %e, "binding activation failed");
                this.notifier.notify("Shortcut failed", &e.to_string());
                let _ = this.event_tx.send(EngineEvent::BindingFailed {
                    binding_id: binding.id.clone(),
                    kind,
                    reason: e.to_string(),
                });
            }
        })
    }

    fn activate(&self, target: &Target) -> Result<(), DispatchError> {
        match target {
            Target::App { app, behavior } => self.activate_app(app, *behavior),
            Target::Url { url } => self.workspace.open_url(url),
            Target::File { path } => self.workspace.open_file(path),
            Target::Script { script } => self.scripts.run(script),
            Target::Macro { name, steps } => self.run_macro(name, steps),
            Target::Snippet { text } => self.clipboard.paste(text),
            Target::System { action } => {
                debug!(?action, "system target ignored by dispatcher");
                Ok(())
            }
        }
    }

    fn activate_app(&self, app: &AppTarget, behavior: AppBehavior) -> Result<(), DispatchError> {
        let Some(running) = self.workspace.find_running(app) else {
            return self.workspace.launch(app);
        };
        let frontmost = self.workspace.frontmost_pid() == Some(running.pid);

        match behavior {
            AppBehavior::ActivateOrHide if frontmost => {
                debug!(app = %running.name, pid = running.pid, "hiding frontmost app");
                self.workspace.hide(running.pid)
            }
            AppBehavior::ActivateOrHide => self.bring_to_front(running.pid),
            AppBehavior::CycleWindows if frontmost => self.cycle_windows(running.pid),
            AppBehavior::CycleWindows => self.bring_to_front(running.pid),
        }
    }

    /// Focus the app's best-known window, falling back to plain activation
    fn bring_to_front(&self, pid: i32) -> Result<(), DispatchError> {
        if self.focus_across_spaces {
            if let Some(handle) = self.resolver.find_window(pid) {
                match self.resolver.focus(&handle) {
                    Ok(()) => return Ok(()),
                    Err(e) => debug!(pid, error = %e, "window focus failed, activating app"),
                }
            }
        }
        self.workspace.activate(pid)
    }

    /// Focus the window after the one cycling last focused.
    ///
    /// The snapshot order is front to back and only changes on refresh, so
    /// the position is tracked here; an unknown or vanished cursor restarts
    /// at the window just behind the front one.
    fn cycle_windows(&self, pid: i32) -> Result<(), DispatchError> {
        let windows = self.resolver.windows_for(pid);
        if windows.len() < 2 {
            self.cycle_cursor.lock().remove(&pid);
            return self.workspace.activate(pid);
        }

        let last = self.cycle_cursor.lock().get(&pid).copied();
        let next = last
            .and_then(|id| windows.iter().position(|w| w.window_id == id))
            .map_or(1, |i| (i + 1) % windows.len());
        let target = &windows[next];

        match self.resolver.focus(target) {
            Ok(()) => {
                self.cycle_cursor.lock().insert(pid, target.window_id);
                Ok(())
            }
            Err(e) => {
                debug!(pid, window_id = target.window_id, error = %e, "cycle focus failed");
                self.cycle_cursor.lock().remove(&pid);
                self.workspace.activate(pid)
            }
        }
    }

    fn run_macro(&self, name: &str, steps: &[MacroStep]) -> Result<(), DispatchError> {
        info!(name, steps = steps.len(), "running macro");
        for step in steps {
            match step {
                MacroStep::OpenUrl { url } => self.workspace.open_url(url)?,
                MacroStep::OpenFile { path } => self.workspace.open_file(path)?,
                MacroStep::RunScript { script } => self.scripts.run(script)?,
                MacroStep::Paste { text } => self.clipboard.paste(text)?,
                MacroStep::Wait { ms } => std::thread::sleep(Duration::from_millis(*ms)),
            }
        }
        Ok(())
    }
}

impl BindingExecutor for ActivationDispatcher {
    fn execute(&self, binding: &Binding) {
        self.dispatch(binding);
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;

    use super::*;
    use crate::bindings::{ScriptSource, TargetKind, TriggerType};
    use crate::dispatch::collaborators::RunningApp;
    use crate::windows::{WindowError, WindowHandle};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    struct FakeWorkspace {
        running: Vec<RunningApp>,
        frontmost: Option<i32>,
        log: Arc<Recorder>,
    }

    impl Workspace for FakeWorkspace {
        fn find_running(&self, app: &AppTarget) -> Option<RunningApp> {
            self.running.iter().find(|r| r.matches(app)).cloned()
        }

        fn frontmost_pid(&self) -> Option<i32> {
            self.frontmost
        }

        fn launch(&self, app: &AppTarget) -> Result<(), DispatchError> {
            self.log.push(format!("launch {}", app.display_name()));
            Ok(())
        }

        fn activate(&self, pid: i32) -> Result<(), DispatchError> {
            self.log.push(format!("activate {pid}"));
            Ok(())
        }

        fn hide(&self, pid: i32) -> Result<(), DispatchError> {
            self.log.push(format!("hide {pid}"));
            Ok(())
        }

        fn open_url(&self, url: &str) -> Result<(), DispatchError> {
            self.log.push(format!("url {url}"));
            Ok(())
        }

        fn open_file(&self, path: &Path) -> Result<(), DispatchError> {
            if path.starts_with("/missing") {
                return Err(DispatchError::FileNotFound(path.to_path_buf()));
            }
            self.log.push(format!("file {}", path.display()));
            Ok(())
        }
    }

    struct FakeScripts(Arc<Recorder>);

    impl ScriptRunner for FakeScripts {
        fn run(&self, script: &ScriptSource) -> Result<(), DispatchError> {
            match script {
                ScriptSource::Inline { command } => self.0.push(format!("script {command}")),
                ScriptSource::File { path, .. } => self.0.push(format!("script {}", path.display())),
            }
            Ok(())
        }
    }

    struct FakeClipboard(Arc<Recorder>);

    impl Clipboard for FakeClipboard {
        fn paste(&self, text: &str) -> Result<(), DispatchError> {
            self.0.push(format!("paste {text}"));
            Ok(())
        }
    }

    struct FakeNotifier(Arc<Recorder>);

    impl Notifier for FakeNotifier {
        fn notify(&self, title: &str, _message: &str) {
            self.0.push(format!("notify {title}"));
        }
    }

    struct FakeResolver {
        windows: Vec<WindowHandle>,
        focus_fails: bool,
        log: Arc<Recorder>,
    }

    impl WindowFocusResolver for FakeResolver {
        fn find_window(&self, pid: i32) -> Option<WindowHandle> {
            self.windows.iter().find(|w| w.pid == pid).cloned()
        }

        fn focus(&self, handle: &WindowHandle) -> Result<(), WindowError> {
            if self.focus_fails {
                return Err(WindowError::Gone(handle.window_id));
            }
            self.log.push(format!("focus {}", handle.window_id));
            Ok(())
        }

        fn windows_for(&self, pid: i32) -> Vec<WindowHandle> {
            self.windows.iter().filter(|w| w.pid == pid).cloned().collect()
        }
    }

    struct Harness {
        log: Arc<Recorder>,
        notes: Arc<Recorder>,
        events: broadcast::Receiver<EngineEvent>,
        dispatcher: ActivationDispatcher,
    }

    fn harness(frontmost: Option<i32>, windows: Vec<WindowHandle>, focus_fails: bool) -> Harness {
        let log = Arc::new(Recorder::default());
        let notes = Arc::new(Recorder::default());
        let (event_tx, events) = broadcast::channel(16);
        let workspace = FakeWorkspace {
            running: vec![RunningApp {
                pid: 42,
                name: "Terminal".to_string(),
                bundle_id: Some("com.apple.Terminal".to_string()),
            }],
            frontmost,
            log: Arc::clone(&log),
        };
        let resolver = FakeResolver {
            windows,
            focus_fails,
            log: Arc::clone(&log),
        };
        let dispatcher = ActivationDispatcher::new(
            Arc::new(workspace),
            Arc::new(FakeScripts(Arc::clone(&log))),
            Arc::new(FakeClipboard(Arc::clone(&log))),
            Arc::new(FakeNotifier(Arc::clone(&notes))),
            Arc::new(resolver),
            event_tx,
        );
        Harness {
            log,
            notes,
            events,
            dispatcher,
        }
    }

    fn app_binding(bundle_id: &str, behavior: AppBehavior) -> Binding {
        Binding::new(
            "app",
            vec![],
            TriggerType::Press,
            Target::App {
                app: AppTarget {
                    bundle_id: Some(bundle_id.to_string()),
                    name: Some(bundle_id.to_string()),
                    path: None,
                },
                behavior,
            },
        )
    }

    fn binding(target: Target) -> Binding {
        Binding::new("b1", vec![], TriggerType::Press, target)
    }

    #[tokio::test]
    async fn test_launches_when_not_running() {
        let h = harness(None, vec![], false);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Safari", AppBehavior::ActivateOrHide))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["launch com.apple.Safari"]);
    }

    #[tokio::test]
    async fn test_hides_frontmost_app() {
        let h = harness(Some(42), vec![WindowHandle::new(1, 42)], false);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Terminal", AppBehavior::ActivateOrHide))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["hide 42"]);
    }

    #[tokio::test]
    async fn test_focuses_known_window_when_in_background() {
        let h = harness(Some(7), vec![WindowHandle::new(5, 42)], false);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Terminal", AppBehavior::ActivateOrHide))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["focus 5"]);
    }

    #[tokio::test]
    async fn test_focus_failure_falls_back_to_activation() {
        let h = harness(Some(7), vec![WindowHandle::new(5, 42)], true);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Terminal", AppBehavior::ActivateOrHide))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["activate 42"]);
    }

    #[tokio::test]
    async fn test_cross_space_focus_disabled_activates() {
        let mut h = harness(Some(7), vec![WindowHandle::new(5, 42)], false);
        h.dispatcher = h.dispatcher.with_focus_across_spaces(false);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Terminal", AppBehavior::ActivateOrHide))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["activate 42"]);
    }

    #[tokio::test]
    async fn test_cycle_walks_windows_across_presses() {
        let windows = vec![
            WindowHandle::new(1, 42),
            WindowHandle::new(2, 42),
            WindowHandle::new(3, 42),
        ];
        let h = harness(Some(42), windows, false);
        let binding = app_binding("com.apple.Terminal", AppBehavior::CycleWindows);
        for _ in 0..4 {
            tokio_test::assert_ok!(h.dispatcher.dispatch(&binding).await);
        }
        assert_eq!(h.log.take(), vec!["focus 2", "focus 3", "focus 1", "focus 2"]);
    }

    #[tokio::test]
    async fn test_cycle_restarts_when_cursor_window_is_gone() {
        let h = harness(
            Some(42),
            vec![WindowHandle::new(1, 42), WindowHandle::new(2, 42)],
            false,
        );
        h.dispatcher.cycle_cursor.lock().insert(42, 99);
        tokio_test::assert_ok!(
            h.dispatcher
                .dispatch(&app_binding("com.apple.Terminal", AppBehavior::CycleWindows))
                .await
        );
        assert_eq!(h.log.take(), vec!["focus 2"]);
    }

    #[tokio::test]
    async fn test_cycle_single_window_activates() {
        let h = harness(Some(42), vec![WindowHandle::new(1, 42)], false);
        h.dispatcher
            .dispatch(&app_binding("com.apple.Terminal", AppBehavior::CycleWindows))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["activate 42"]);
    }

    #[tokio::test]
    async fn test_missing_file_reports_failure() {
        let mut h = harness(None, vec![], false);
        h.dispatcher
            .dispatch(&binding(Target::File {
                path: PathBuf::from("/missing/report.pdf"),
            }))
            .await
            .unwrap();

        assert!(h.log.take().is_empty());
        assert_eq!(h.notes.take(), vec!["notify Shortcut failed"]);
        let event = h.events.try_recv().unwrap();
        assert!(matches!(
            event,
            EngineEvent::BindingFailed { binding_id, kind: TargetKind::File, .. } if binding_id == "b1"
        ));
    }

    #[tokio::test]
    async fn test_macro_runs_steps_in_order() {
        let h = harness(None, vec![], false);
        let steps = vec![
            MacroStep::OpenUrl {
                url: "https://example.com".to_string(),
            },
            MacroStep::Wait { ms: 1 },
            MacroStep::RunScript {
                script: ScriptSource::Inline {
                    command: "make".to_string(),
                },
            },
            MacroStep::Paste {
                text: "done".to_string(),
            },
        ];
        h.dispatcher
            .dispatch(&binding(Target::Macro {
                name: "deploy".to_string(),
                steps,
            }))
            .await
            .unwrap();
        assert_eq!(
            h.log.take(),
            vec!["url https://example.com", "script make", "paste done"]
        );
    }

    #[tokio::test]
    async fn test_macro_stops_at_first_failure() {
        let h = harness(None, vec![], false);
        let steps = vec![
            MacroStep::OpenFile {
                path: PathBuf::from("/missing/a.txt"),
            },
            MacroStep::Paste {
                text: "never".to_string(),
            },
        ];
        h.dispatcher
            .dispatch(&binding(Target::Macro {
                name: "broken".to_string(),
                steps,
            }))
            .await
            .unwrap();
        assert!(h.log.take().is_empty());
        assert_eq!(h.notes.take().len(), 1);
    }

    #[tokio::test]
    async fn test_snippet_and_url_targets() {
        let h = harness(None, vec![], false);
        h.dispatcher
            .dispatch(&binding(Target::Snippet {
                text: "hello".to_string(),
            }))
            .await
            .unwrap();
        h.dispatcher
            .dispatch(&binding(Target::Url {
                url: "https://rust-lang.org".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(h.log.take(), vec!["paste hello", "url https://rust-lang.org"]);
    }
}
