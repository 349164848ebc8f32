//! Status/control surface: newline-delimited JSON over a Unix socket.

use anyhow::Context;
use shared::ipc::{Command, Response};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::actuator::ActuatorController;
use crate::events::EventLog;
use crate::frame::FrameBroker;
use crate::rate_limit::ControlRateLimiter;
use crate::state::SharedState;

const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the control surface reads or writes.
pub struct ControlContext {
    pub state: Arc<SharedState>,
    pub broker: Arc<FrameBroker>,
    pub actuator: ActuatorController,
    pub events: Arc<Mutex<EventLog>>,
    pub limiter: ControlRateLimiter,
}

pub struct DaemonServer {
    socket_path: PathBuf,
    context: Arc<ControlContext>,
}

impl DaemonServer {
    pub fn new(socket_path: PathBuf, context: Arc<ControlContext>) -> Self {
        Self {
            socket_path,
            context,
        }
    }

    pub fn bind(&self) -> anyhow::Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("failed to bind {}", self.socket_path.display()))?;
        info!("Control socket listening at {}", self.socket_path.display());
        Ok(listener)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: UnixListener) -> anyhow::Result<()> {
        loop {
            let context = Arc::clone(&self.context);
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(context, stream).await {
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

    async fn handle_connection(context: Arc<ControlContext>, stream: UnixStream) -> anyhow::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let command: Command = match serde_json::from_str(&line) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Rejected malformed command: {}", e);
                    write_line(&mut writer, &Response::Error(format!("invalid command: {}", e))).await?;
                    continue;
                }
            };
            debug!("Received command: {:?}", command);

            if let Command::WatchFrames { interval_ms } = command {
                return stream_frames(&context, &mut writer, interval_ms).await;
            }

            let response = handle_command(&context, command).await;
            write_line(&mut writer, &response).await?;
        }
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

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Answers one request. Never fails: problems become `Response::Error`.
pub async fn handle_command(context: &ControlContext, command: Command) -> Response {
    if command.is_write() && !context.limiter.check() {
        warn!("Rate limited: {:?}", command);
        return Response::Error("rate limited, try again shortly".to_string());
    }

    match command {
        Command::Status => Response::Status(context.state.get_status()),
        Command::Toggle(flag) => Response::Flag {
            flag,
            enabled: context.state.modes.toggle(flag),
        },
        Command::Jog { axis, direction } => {
            if direction == 0 {
                return Response::Error("jog direction must be +1 or -1".to_string());
            }
            let actuator = context.actuator.clone();
            let result = tokio::task::spawn_blocking(move || actuator.jog(axis, direction.signum())).await;
            match result {
                Ok(Ok(moved)) => Response::Jogged {
                    axis,
                    angle: moved.angle,
                    clamped: moved.clamped(),
                },
                Ok(Err(e)) => Response::Error(format!("jog failed: {}", e)),
                Err(e) => Response::Error(format!("jog task failed: {}", e)),
            }
        }
        Command::SetVolume(volume) => Response::Volume(context.state.set_volume(volume)),
        Command::Detections(kind) => Response::Detections(context.state.result(kind)),
        Command::Events(query) => {
            let events = Arc::clone(&context.events);
            let result = tokio::task::spawn_blocking(move || {
                events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .query(&query)
            })
            .await;
            match result {
                Ok(Ok(records)) => Response::Events(records),
                Ok(Err(e)) => Response::Error(e.to_string()),
                Err(e) => Response::Error(format!("query task failed: {}", e)),
            }
        }
        Command::WatchFrames { .. } => {
            Response::Error("frame streaming needs its own connection".to_string())
        }
    }
}

/// Pull-based stream: every tick sends the latest snapshot as a header line
/// followed by its raw bytes, whatever the capture rate. Ends when the client
/// goes away.
async fn stream_frames<W: AsyncWrite + Unpin>(
    context: &ControlContext,
    writer: &mut W,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let period = Duration::from_millis(interval_ms).max(MIN_FRAME_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    info!("Frame stream started ({:?} interval)", period);

    loop {
        ticker.tick().await;
        let Some(frame) = context.broker.snapshot() else {
            continue;
        };
        let sent = async {
            write_line(writer, &Response::Frame(frame.header())).await?;
            writer.write_all(&frame.data).await?;
            writer.flush().await?;
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = sent {
            info!("Frame stream closed: {}", e);
            return Ok(());
        }
    }
}
