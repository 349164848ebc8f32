use shared::ipc::{Command, FrameHeader, IpcError, Response};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout for socket operations (5 seconds)
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the Unix socket path for the daemon.
/// Uses XDG runtime directory if available, falls back to /tmp/sentryd.sock
fn get_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("sentryd.sock")
    } else {
        PathBuf::from("/tmp/sentryd.sock")
    }
}

async fn with_timeout<T, F>(what: &str, fut: F) -> Result<T, IpcError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(SOCKET_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!("{} timeout: no progress within {:?}", what, SOCKET_TIMEOUT);
            Err(IpcError::Timeout)
        }
    }
}

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
        }
    }

    pub fn with_socket(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self, cmd: &Command) -> Result<BufReader<UnixStream>, IpcError> {
        let mut stream = match timeout(SOCKET_TIMEOUT, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Connection timeout: failed to connect to daemon at {} within {:?}",
                    self.socket_path.display(),
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        };

        let mut line = serde_json::to_vec(cmd)?;
        line.push(b'\n');
        with_timeout("Write", stream.write_all(&line)).await?;

        Ok(BufReader::new(stream))
    }

    async fn read_response(reader: &mut BufReader<UnixStream>) -> Result<Response, IpcError> {
        let mut line = String::new();
        let n = with_timeout("Read", reader.read_line(&mut line)).await?;
        if n == 0 {
            return Err(IpcError::Closed);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    pub async fn send_command(&self, cmd: Command) -> Result<Response, IpcError> {
        let mut reader = self.connect(&cmd).await?;
        Self::read_response(&mut reader).await
    }

    /// Streams frames until `count` have arrived (or forever with `None`),
    /// handing each header and its pixels to `on_frame`.
    pub async fn watch_frames<F>(
        &self,
        interval_ms: u64,
        count: Option<usize>,
        mut on_frame: F,
    ) -> Result<usize, IpcError>
    where
        F: FnMut(&FrameHeader, &[u8]),
    {
        let mut reader = self.connect(&Command::WatchFrames { interval_ms }).await?;
        let mut received = 0;
        let mut pixels = Vec::new();

        while count.map_or(true, |limit| received < limit) {
            let header = match Self::read_response(&mut reader).await? {
                Response::Frame(header) => header,
                Response::Error(msg) => return Err(IpcError::Io(std::io::Error::other(msg))),
                other => {
                    return Err(IpcError::Io(std::io::Error::other(format!(
                        "unexpected response: {:?}",
                        other
                    ))))
                }
            };
            pixels.resize(header.len, 0);
            with_timeout("Read", reader.read_exact(&mut pixels)).await?;
            on_frame(&header, &pixels);
            received += 1;
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Serves exactly one connection: reads a command line and answers with
    /// whatever `respond` returns.
    fn mock_daemon<F>(respond: F) -> (tempfile::TempDir, PathBuf)
    where
        F: FnOnce(Command) -> Option<Response> + Send + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("sentryd.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let command: Command = serde_json::from_str(line.trim()).unwrap();

            match respond(command) {
                Some(response) => {
                    let mut bytes = serde_json::to_vec(&response).unwrap();
                    bytes.push(b'\n');
                    reader.get_mut().write_all(&bytes).await.unwrap();
                }
                // Don't send response - client will timeout waiting for it
                None => tokio::time::sleep(Duration::from_secs(6)).await,
            }
        });
        (dir, socket)
    }

    #[tokio::test]
    async fn test_daemon_client_new() {
        let client = DaemonClient::new();
        if let Some(runtime_dir) = dirs::runtime_dir() {
            assert_eq!(client.socket_path, runtime_dir.join("sentryd.sock"));
        } else {
            assert_eq!(client.socket_path, PathBuf::from("/tmp/sentryd.sock"));
        }
    }

    #[tokio::test]
    async fn test_send_command_socket_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::with_socket(dir.path().join("missing.sock"));
        let result = client.send_command(Command::Status).await;
        assert!(matches!(result, Err(IpcError::ConnectionRefused)));
    }

    #[tokio::test]
    async fn test_send_command_with_mock_server() {
        let (_dir, socket) = mock_daemon(|command| {
            assert_eq!(command, Command::SetVolume(0.4));
            Some(Response::Volume(0.4))
        });

        let client = DaemonClient::with_socket(socket);
        let response = tokio_test::assert_ok!(client.send_command(Command::SetVolume(0.4)).await);
        assert_eq!(response, Response::Volume(0.4));
    }

    #[tokio::test]
    async fn test_send_command_error_response() {
        let (_dir, socket) = mock_daemon(|_| Some(Response::Error("rate limited".to_string())));

        let client = DaemonClient::with_socket(socket);
        let result = client.send_command(Command::Status).await;
        assert!(matches!(result, Ok(Response::Error(msg)) if msg == "rate limited"));
    }

    #[tokio::test]
    async fn test_send_command_timeout_on_read() {
        let (_dir, socket) = mock_daemon(|_| None);

        let client = DaemonClient::with_socket(socket);
        let result = client.send_command(Command::Status).await;
        assert!(matches!(result, Err(IpcError::Timeout)));
    }

    #[tokio::test]
    async fn test_watch_frames_reads_header_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("sentryd.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.contains("WatchFrames"));

            for sequence in 1..=2u64 {
                let header = FrameHeader {
                    sequence,
                    height: 1,
                    width: 2,
                    channels: 3,
                    len: 6,
                };
                let mut bytes = serde_json::to_vec(&Response::Frame(header)).unwrap();
                bytes.push(b'\n');
                bytes.extend_from_slice(&[sequence as u8; 6]);
                reader.get_mut().write_all(&bytes).await.unwrap();
            }
        });

        let client = DaemonClient::with_socket(socket);
        let mut seen = Vec::new();
        let received = client
            .watch_frames(10, Some(2), |header, pixels| {
                seen.push((header.sequence, pixels.to_vec()));
            })
            .await
            .unwrap();

        assert_eq!(received, 2);
        assert_eq!(seen, vec![(1, vec![1u8; 6]), (2, vec![2u8; 6])]);
    }
}
