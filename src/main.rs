//! warpkey-daemon: Background daemon for global keyboard shortcuts
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global key interception via CGEventTap
//! - Press / double-press / triple-press / hold disambiguation per combo
//! - App, URL, file, script, macro and snippet activation
//! - A periodically refreshed window cache for cross-space focusing
//! - IPC server for settings/UI collaborators

mod bindings;
mod config;
mod dispatch;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod state;
mod windows;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dispatch::{
    ActivationDispatcher, LogNotifier, ShellScriptRunner, SystemClipboard, SystemWorkspace,
};
use crate::events::EngineEvent;
use crate::hotkey::HotkeyListener;
use crate::ipc::Server;
use crate::lifecycle::{ListenerSupervisor, ShutdownSignal};
use crate::state::{EngineInput, HotkeyEngine};
use crate::windows::WindowCache;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "warpkey-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");

    let initial_bindings = match config.load_bindings() {
        Ok(bindings) => bindings,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable bindings file");
            Vec::new()
        }
    };

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Listener / IPC -> engine
    let (input_tx, input_rx) = mpsc::channel::<EngineInput>(256);
    // Engine / dispatcher -> supervisor, IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<EngineEvent>(128);

    // Window cache refreshes on its own timer
    let window_cache = Arc::new(WindowCache::new(windows::platform_source()));
    let refresh_task = window_cache.spawn_refresh(config.window_refresh, shutdown.subscribe());

    let dispatcher = ActivationDispatcher::new(
        Arc::new(SystemWorkspace),
        Arc::new(ShellScriptRunner),
        Arc::new(SystemClipboard::default()),
        Arc::new(LogNotifier),
        window_cache.clone(),
        event_tx.clone(),
    )
    .with_focus_across_spaces(config.focus_across_spaces);

    // Create the engine
    let mut engine = HotkeyEngine::new(
        config.timing,
        config.builtins.clone(),
        Arc::new(dispatcher),
        event_tx.clone(),
    )
    .with_rebuild_debounce(config.rebuild_debounce);
    engine.rebuild(initial_bindings);
    let status_rx = engine.status();

    // The supervisor owns the listener and follows the engine's monitoring state
    let listener = Arc::new(HotkeyListener::new(input_tx.clone()));
    let supervisor = ListenerSupervisor::new(listener.clone(), input_tx.clone(), config.restart_delay);
    let supervisor_task = tokio::spawn(supervisor.run(event_tx.subscribe(), shutdown.subscribe()));

    // Create IPC server
    let server = Server::new(&config.socket_path, input_tx.clone(), status_rx, event_tx.clone())?;

    input_tx.send(EngineInput::Start).await?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the engine (processes key events and timers)
        _ = engine.run(input_rx) => {
            info!("hotkey engine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    shutdown.trigger();
    if let Err(e) = supervisor_task.await {
        warn!(?e, "supervisor task failed");
    }
    listener.stop();
    server.shutdown().await;
    refresh_task.abort();

    info!("warpkey-daemon stopped");

    Ok(())
}
