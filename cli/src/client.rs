use shared::ipc::{Command, IpcError, Response};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::warn;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Start may load a model and Say waits on the assistant.
const SLOW_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

fn get_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("atlasd.sock")
    } else {
        PathBuf::from("/tmp/atlasd.sock")
    }
}

fn is_slow(cmd: &Command) -> bool {
    matches!(cmd, Command::Start | Command::Toggle | Command::Say(_))
}

pub struct DaemonClient {
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            io_timeout: SOCKET_TIMEOUT,
        }
    }

    pub async fn send_command(&self, cmd: Command) -> Result<Response, IpcError> {
        let mut stream =
            match timeout(self.io_timeout, UnixStream::connect(&self.socket_path)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    return Err(IpcError::ConnectionRefused);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "Connection timeout: failed to connect to daemon at {} within {:?}",
                        self.socket_path.display(),
                        self.io_timeout
                    );
                    return Err(IpcError::Timeout);
                }
            };

        let command_json = serde_json::to_vec(&cmd)?;

        // The daemon reads until EOF, so close our write half after the command.
        let write = async {
            stream.write_all(&command_json).await?;
            stream.shutdown().await
        };
        match timeout(self.io_timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Write timeout: failed to send command within {:?}", self.io_timeout);
                return Err(IpcError::Timeout);
            }
        }

        let read_timeout = if is_slow(&cmd) {
            SLOW_COMMAND_TIMEOUT.max(self.io_timeout)
        } else {
            self.io_timeout
        };
        let mut buffer = Vec::new();
        match timeout(read_timeout, stream.read_to_end(&mut buffer)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                warn!("Read timeout: no response from daemon within {:?}", read_timeout);
                return Err(IpcError::Timeout);
            }
        }

        let response: Response = serde_json::from_slice(&buffer)?;

        Ok(response)
    }
}
