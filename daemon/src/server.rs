use shared::ipc::{Command, Response};
use shared::ListeningMode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::rate_limit::CommandRateLimiter;
use crate::state::DaemonState;

const SOCKET_NAME: &str = "atlasd.sock";
const MAX_REQUEST_BYTES: u64 = 4096;

/// `$XDG_RUNTIME_DIR/atlasd.sock`, or `/tmp/atlasd.sock` without a runtime dir.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(SOCKET_NAME)
}

pub struct DaemonServer {
    socket_path: PathBuf,
    state: Arc<DaemonState>,
    limiter: Arc<CommandRateLimiter>,
    io_timeout: Duration,
}

impl DaemonServer {
    pub fn new(socket_path: PathBuf, state: Arc<DaemonState>) -> Self {
        let limiter = CommandRateLimiter::from_config(&state.config.rate_limit);
        let io_timeout = Duration::from_secs(state.config.timeouts.socket_operation_timeout_seconds);
        Self {
            socket_path,
            state,
            limiter: Arc::new(limiter),
            io_timeout,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Listening on {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let allowed = self.limiter.check();
                    if !allowed {
                        warn!("Rate limit exceeded, rejecting command");
                    }

                    let state = Arc::clone(&self.state);
                    let io_timeout = self.io_timeout;
                    tokio::spawn(async move {
                        let result =
                            Self::handle_connection(state, stream, io_timeout, allowed).await;
                        if let Err(e) = result {
                            error!("Error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        state: Arc<DaemonState>,
        mut stream: UnixStream,
        io_timeout: Duration,
        allowed: bool,
    ) -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        timeout(
            io_timeout,
            (&mut stream).take(MAX_REQUEST_BYTES).read_to_end(&mut buffer),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out reading command"))??;

        if buffer.is_empty() {
            return Ok(());
        }

        let response = match serde_json::from_slice::<Command>(&buffer) {
            Ok(_) if !allowed => Response::Error("Too many commands, slow down".to_string()),
            Ok(command) => {
                info!("Received command: {:?}", command);
                handle_command(&state, command).await
            }
            Err(e) => {
                warn!("Malformed command: {}", e);
                Response::Error(format!("Malformed command: {}", e))
            }
        };

        debug!("Sending response: {:?}", response);
        Self::write_response(stream, &response, io_timeout).await
    }

    async fn write_response(
        mut stream: UnixStream,
        response: &Response,
        io_timeout: Duration,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(response)?;
        timeout(io_timeout, async {
            stream.write_all(&payload).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| anyhow::anyhow!("Timed out writing response"))??;
        Ok(())
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Applies one control command to the running daemon.
pub async fn handle_command(state: &DaemonState, command: Command) -> Response {
    let pipeline = &state.pipeline;

    match command {
        Command::Start => match pipeline.start().await {
            Ok(()) => Response::Ok,
            Err(e) => {
                error!("Failed to start listening: {}", e);
                Response::Error(e.user_message())
            }
        },
        Command::Stop => {
            pipeline.stop().await;
            Response::Ok
        }
        Command::Toggle => {
            if pipeline.mode() == ListeningMode::Idle {
                match pipeline.start().await {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::Error(e.user_message()),
                }
            } else {
                pipeline.stop().await;
                Response::Ok
            }
        }
        Command::Release => {
            pipeline.destroy().await;
            Response::Ok
        }
        Command::Listen => {
            if pipeline.start_command_listening().await {
                Response::Ok
            } else {
                Response::Error("Not listening for the wake phrase".to_string())
            }
        }
        Command::Cancel => {
            pipeline.stop_command_listening().await;
            Response::Ok
        }
        Command::Say(text) => {
            if text.trim().is_empty() {
                return Response::Error("Nothing to say".to_string());
            }
            pipeline.stop_command_listening().await;
            Response::Reply(state.assistant.handle(&text).await)
        }
        Command::Status => Response::Status(state.get_status().await),
    }
}
