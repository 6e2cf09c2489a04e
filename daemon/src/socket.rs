//! Unix socket server for IPC
//!
//! Clients send one JSON request per line and get one response line back.
//! Monitor events broadcast to every client are interleaved between
//! responses, also one JSON document per line.

use crate::protocol::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: Request) -> Response;
}

pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
    broadcast_tx: broadcast::Sender<String>,
}

impl SocketServer {
    /// Bind at `path`, replacing a stale socket file. `backlog` bounds the
    /// broadcast lines buffered per client before it starts lagging.
    pub async fn bind(path: &Path, backlog: usize) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        let (broadcast_tx, _) = broadcast::channel(backlog.max(1));
        info!("Socket server listening on {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            broadcast_tx,
        })
    }

    pub fn broadcast_sender(&self) -> broadcast::Sender<String> {
        self.broadcast_tx.clone()
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn socket_path() -> PathBuf {
        // SAFETY: getuid cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}/leakwatch.sock", uid))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serve one client until it hangs up or the broadcast side closes.
pub async fn handle_client<H>(
    stream: UnixStream,
    mut broadcast_rx: broadcast::Receiver<String>,
    handler: Arc<H>,
) where
    H: RequestHandler + Send + Sync + 'static,
{
    let (reader, mut writer) = stream.into_split();
    // next_line keeps a partially read line buffered if a broadcast wins the select
    let mut lines = BufReader::new(reader).lines();

    loop {
        let outgoing = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let response = dispatch(handler.as_ref(), &line).await;
                    match serde_json::to_string(&response) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode response: {}", e);
                            continue;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            },
            message = broadcast_rx.recv() => match message {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Client lagging, skipped {} messages", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = write_line(&mut writer, &outgoing).await {
            error!("Failed to write to client: {}", e);
            break;
        }
    }
}

async fn dispatch<H: RequestHandler>(handler: &H, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handler.handle(request).await,
        Err(e) => {
            warn!("Invalid request: {}", e);
            Response::error(e)
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}
