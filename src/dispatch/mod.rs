//! Dispatch module for binding activation
//!
//! The engine hands every resolved binding to a `BindingExecutor`. The
//! production executor is `ActivationDispatcher`, which routes each target
//! kind to a collaborator and keeps slow work on the blocking pool.

mod collaborators;
mod dispatcher;
#[cfg(target_os = "macos")]
mod macos;
mod system;

use crate::bindings::Binding;

pub use collaborators::{
    Clipboard, DispatchError, Notifier, RunningApp, ScriptRunner, Workspace,
};
pub use dispatcher::ActivationDispatcher;
pub use system::{LogNotifier, ShellScriptRunner, SystemClipboard, SystemWorkspace};

/// Receives bindings resolved by the engine.
///
/// Implementations must return without blocking on the side effect.
pub trait BindingExecutor: Send + Sync {
    fn execute(&self, binding: &Binding);
}
