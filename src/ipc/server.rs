//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! engine events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::EngineEvent;
use crate::state::{EngineInput, EngineStatus};

use super::protocol::{encode_frame, read_frame, DaemonStatus, Notification, Request, Response};

/// Outgoing frames buffered per client
const CLIENT_QUEUE: usize = 64;

/// Handles the server shares with every client task
struct ServerContext {
    input_tx: mpsc::Sender<EngineInput>,
    status_rx: watch::Receiver<EngineStatus>,
    event_tx: broadcast::Sender<EngineEvent>,
    start_time: Instant,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        input_tx: mpsc::Sender<EngineInput>,
        status_rx: watch::Receiver<EngineStatus>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ServerContext {
                input_tx,
                status_rx,
                event_tx,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(CLIENT_QUEUE);

        let writer_task: JoinHandle<()> = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(?e, "client write failed");
                    break;
                }
            }
        });

        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = async {
            while let Some(body) = read_frame(&mut reader).await? {
                let response = match serde_json::from_slice::<Request>(&body) {
                    Ok(request) => {
                        debug!(?request, "received request");
                        let subscribe = matches!(request, Request::Subscribe);
                        let response = Self::process_request(request, &context).await;
                        if subscribe && forwarder.is_none() {
                            let events = context.event_tx.subscribe();
                            out_tx.send(encode_frame(&response)?).await?;
                            forwarder = Some(Self::forward_events(events, out_tx.clone()));
                            debug!("client subscribed to notifications");
                            continue;
                        }
                        response
                    }
                    Err(e) => Response::error("invalid_request", e.to_string()),
                };

                out_tx.send(encode_frame(&response)?).await?;
            }
            debug!("client disconnected");
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        drop(out_tx);
        let _ = writer_task.await;
        result
    }

    /// Push every engine event to one subscribed client
    fn forward_events(
        mut events: broadcast::Receiver<EngineEvent>,
        out_tx: mpsc::Sender<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let frame = match encode_frame(&Notification::Event { event }) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(?e, "failed to encode notification");
                                continue;
                            }
                        };
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged behind engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ServerContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let status = context.status_rx.borrow().clone();
                let uptime = context.start_time.elapsed().as_secs();
                Response::Status(DaemonStatus::from_engine(&status, uptime))
            }

            Request::Subscribe => Response::Subscribed,

            Request::SetBindings { bindings } => {
                let count = bindings.len();
                match context.input_tx.send(EngineInput::SetBindings(bindings)).await {
                    Ok(()) => {
                        info!(count, "bindings received via IPC");
                        Response::BindingsAccepted { count }
                    }
                    Err(_) => Response::error("engine_unavailable", "hotkey engine is not running"),
                }
            }

            Request::GetConflicts => Response::Conflicts {
                conflicts: context.status_rx.borrow().conflicts.clone(),
            },

            Request::StartMonitoring => Self::forward(context, EngineInput::Start).await,

            Request::StopMonitoring => Self::forward(context, EngineInput::Stop).await,
        }
    }

    async fn forward(context: &ServerContext, input: EngineInput) -> Response {
        match context.input_tx.send(input).await {
            Ok(()) => Response::Ok,
            Err(_) => Response::error("engine_unavailable", "hotkey engine is not running"),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
