//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! controller events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::controller::{ControlError, ControllerHandle};
use crate::events::TorchEvent;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: ClientContext,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler needs
#[derive(Clone)]
struct ClientContext {
    controller: ControllerHandle,
    /// Source of notifications for subscribed clients
    events: broadcast::Sender<TorchEvent>,
    start_time: Instant,
}

/// A frame decoded by the reader half of a connection
enum Incoming {
    Request(Request),
    Malformed(String),
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        controller: ControllerHandle,
        events: broadcast::Sender<TorchEvent>,
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
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context: ClientContext {
                controller,
                events,
                start_time: Instant::now(),
            },
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = self.context.clone();
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
    async fn handle_client<S>(stream: S, context: ClientContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        // Frames are read on their own task so a subscribed client can
        // receive notifications while no request is in flight
        let (incoming_tx, mut incoming_rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(async move {
            loop {
                let incoming = match read_message(&mut reader).await {
                    Ok(Some(body)) => match serde_json::from_slice::<Request>(&body) {
                        Ok(request) => Incoming::Request(request),
                        Err(e) => Incoming::Malformed(e.to_string()),
                    },
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read from client, disconnecting");
                        break;
                    }
                };
                if incoming_tx.send(incoming).await.is_err() {
                    break;
                }
            }
        });

        let result = Self::serve(&mut writer, &mut incoming_rx, &context).await;
        reader_task.abort();
        result
    }

    /// Answer requests and forward notifications until the reader stops
    async fn serve<W>(
        writer: &mut W,
        incoming_rx: &mut mpsc::Receiver<Incoming>,
        context: &ClientContext,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut events: Option<broadcast::Receiver<TorchEvent>> = None;

        loop {
            tokio::select! {
                incoming = incoming_rx.recv() => {
                    let Some(incoming) = incoming else {
                        return Ok(());
                    };

                    let response = match incoming {
                        Incoming::Request(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, context).await;
                            if subscribe && events.is_none() {
                                events = Some(context.events.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Incoming::Malformed(message) => {
                            warn!(%message, "failed to parse request");
                            Response::Error {
                                code: "bad_request".to_string(),
                                message,
                            }
                        }
                    };

                    write_message(writer, &response).await?;
                }

                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            write_message(writer, &Notification::Event { event }).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged, events dropped");
                        }
                        Err(RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let response = match context.controller.status().await {
                    Ok(torch) => Response::Status(DaemonStatus::new(
                        torch,
                        context.start_time.elapsed().as_secs(),
                    )),
                    Err(e) => e.into(),
                };
                (response, false)
            }

            Request::Toggle => (accepted(context.controller.toggle().await), false),

            Request::SelectPattern { pattern } => {
                info!(%pattern, "pattern selected via IPC");
                (accepted(context.controller.select_pattern(pattern).await), false)
            }

            Request::SetSpeed { period_ms } => {
                info!(period_ms, "speed changed via IPC");
                (accepted(context.controller.set_speed(period_ms).await), false)
            }

            Request::Subscribe => (Response::Subscribed, true),
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

fn accepted(result: Result<(), ControlError>) -> Response {
    match result {
        Ok(()) => Response::Accepted,
        Err(e) => {
            debug!(%e, "request rejected");
            e.into()
        }
    }
}

/// Wait for the next event, forever if not subscribed
async fn next_event(events: &mut Option<broadcast::Receiver<TorchEvent>>) -> Result<TorchEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame. `None` on a clean disconnect.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("message of {} bytes exceeds {} byte limit", len, MAX_MESSAGE_LEN);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}
