pub mod broker;
pub mod capture;

pub use broker::FrameBroker;
pub use capture::{CaptureDevice, CaptureWorker, FfmpegCamera};

use shared::ipc::FrameHeader;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame broker is not ready: dimensions not described")]
    NotReady,

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("frame dimensions already described as {0:?}")]
    AlreadyDescribed(FrameDims),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDims {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameDims {
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    /// Any zero dimension means the broker has not been set up yet.
    pub fn is_ready(&self) -> bool {
        self.len() > 0
    }
}

/// A complete copy of the broker slot taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub dims: FrameDims,
    pub data: Vec<u8>,
    pub sequence: u64,
}

impl Frame {
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            sequence: self.sequence,
            height: self.dims.height,
            width: self.dims.width,
            channels: self.dims.channels,
            len: self.data.len(),
        }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.dims.width / 2) as i32, (self.dims.height / 2) as i32)
    }
}
