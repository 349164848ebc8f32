use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{FrameBroker, FrameDims};
use crate::config::CameraConfig;
use crate::worker::{contain, RunFlag};

/// A frame source with a fixed resolution.
pub trait CaptureDevice: Send {
    fn dims(&self) -> FrameDims;

    /// Fills `buf` with one frame. `Ok(false)` means no frame was available.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<bool>;
}

/// Reads a V4L2 device through an `ffmpeg` child emitting raw BGR24 frames.
pub struct FfmpegCamera {
    device: String,
    dims: FrameDims,
    child: Option<(Child, ChildStdout)>,
}

impl FfmpegCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            device: config.device.clone(),
            dims: FrameDims::new(config.height, config.width, 3),
            child: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-video_size")
            .arg(format!("{}x{}", self.dims.width, self.dims.height))
            .arg("-i")
            .arg(&self.device)
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }

    fn ensure_running(&mut self) -> Result<&mut ChildStdout> {
        if self.child.is_none() {
            info!("Starting ffmpeg capture on {}", self.device);
            let mut child = self
                .command()
                .spawn()
                .with_context(|| format!("failed to spawn ffmpeg for {}", self.device))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("ffmpeg stdout was not captured"))?;
            self.child = Some((child, stdout));
        }
        match self.child.as_mut() {
            Some((_, stdout)) => Ok(stdout),
            None => Err(anyhow!("ffmpeg child not running")),
        }
    }

    fn shutdown(&mut self) {
        if let Some((mut child, _)) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl CaptureDevice for FfmpegCamera {
    fn dims(&self) -> FrameDims {
        self.dims
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<bool> {
        let stdout = self.ensure_running()?;
        match stdout.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("ffmpeg stream ended ({}), restarting on next read", e);
                self.shutdown();
                Ok(false)
            }
        }
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pulls frames at device rate and publishes them into the broker.
pub struct CaptureWorker {
    device: Box<dyn CaptureDevice>,
    broker: Arc<FrameBroker>,
    buffer: Vec<u8>,
    retry: Duration,
}

impl CaptureWorker {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        broker: Arc<FrameBroker>,
        retry: Duration,
    ) -> Result<Self> {
        let dims = device.dims();
        broker.describe(dims)?;
        Ok(Self {
            buffer: vec![0; dims.len()],
            device,
            broker,
            retry,
        })
    }

    /// Reads and publishes one frame. Returns whether a frame was published.
    pub fn tick(&mut self) -> Result<bool> {
        if !self.device.read_frame(&mut self.buffer)? {
            return Ok(false);
        }
        let sequence = self.broker.publish(&self.buffer)?;
        debug!("Published frame {}", sequence);
        Ok(true)
    }

    /// Blocks on the device; a missing frame or device error backs off for
    /// the retry interval and tries again.
    pub fn run(mut self, run: RunFlag) {
        info!("[capture] worker started");
        while run.is_running() {
            if contain("capture", || self.tick()) != Some(true) {
                thread::sleep(self.retry);
            }
        }
        info!("[capture] worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedCamera {
        dims: FrameDims,
        script: Vec<Option<u8>>,
    }

    impl CaptureDevice for ScriptedCamera {
        fn dims(&self) -> FrameDims {
            self.dims
        }

        fn read_frame(&mut self, buf: &mut [u8]) -> Result<bool> {
            match self.script.pop() {
                Some(Some(fill)) => {
                    buf.fill(fill);
                    Ok(true)
                }
                Some(None) => Ok(false),
                None => Err(anyhow!("device unplugged")),
            }
        }
    }

    #[test]
    fn test_capture_publishes_frames_and_tolerates_gaps() {
        let broker = Arc::new(FrameBroker::new());
        let camera = ScriptedCamera {
            dims: FrameDims::new(2, 2, 3),
            // popped from the back
            script: vec![Some(3), None, Some(1)],
        };
        let mut worker =
            CaptureWorker::new(Box::new(camera), Arc::clone(&broker), Duration::ZERO).unwrap();

        assert!(worker.tick().unwrap());
        assert_eq!(broker.snapshot().unwrap().data, vec![1u8; 12]);

        assert!(!worker.tick().unwrap());
        assert_eq!(broker.sequence(), 1);

        assert!(worker.tick().unwrap());
        assert_eq!(broker.snapshot().unwrap().data, vec![3u8; 12]);

        assert!(worker.tick().is_err());
        assert_eq!(broker.snapshot().unwrap().sequence, 2);
    }

    #[test]
    fn test_ffmpeg_camera_dims_follow_config() {
        let camera = FfmpegCamera::new(&CameraConfig::default());
        assert_eq!(camera.dims(), FrameDims::new(480, 640, 3));
        assert!(camera.child.is_none());
    }
}
