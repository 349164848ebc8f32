use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{Frame, FrameDims, FrameError};

struct Slot {
    data: Vec<u8>,
    sequence: u64,
}

/// Single-writer, many-reader frame slot.
///
/// The pixel buffer is the only state in the process guarded by a real lock,
/// and the lock is held only for the copy in or out. Dimensions are written
/// once at start-up and read lock-free.
pub struct FrameBroker {
    height: AtomicU32,
    width: AtomicU32,
    channels: AtomicU32,
    slot: Mutex<Slot>,
}

impl FrameBroker {
    pub fn new() -> Self {
        Self {
            height: AtomicU32::new(0),
            width: AtomicU32::new(0),
            channels: AtomicU32::new(0),
            slot: Mutex::new(Slot {
                data: Vec::new(),
                sequence: 0,
            }),
        }
    }

    pub fn with_dims(dims: FrameDims) -> Result<Self, FrameError> {
        let broker = Self::new();
        broker.describe(dims)?;
        Ok(broker)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panic elsewhere cannot leave a torn frame: publish copies in one call.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the dimension descriptor. Repeating the same dimensions is a no-op.
    pub fn describe(&self, dims: FrameDims) -> Result<(), FrameError> {
        let current = self.dims();
        if current.is_ready() {
            return if current == dims {
                Ok(())
            } else {
                Err(FrameError::AlreadyDescribed(current))
            };
        }

        let mut slot = self.lock();
        slot.data = vec![0; dims.len()];
        slot.sequence = 0;
        self.height.store(dims.height, Ordering::Release);
        self.width.store(dims.width, Ordering::Release);
        self.channels.store(dims.channels, Ordering::Release);
        info!(
            "Frame broker ready: {}x{}x{} ({} bytes)",
            dims.width,
            dims.height,
            dims.channels,
            dims.len()
        );
        Ok(())
    }

    pub fn dims(&self) -> FrameDims {
        FrameDims {
            height: self.height.load(Ordering::Acquire),
            width: self.width.load(Ordering::Acquire),
            channels: self.channels.load(Ordering::Acquire),
        }
    }

    /// Copies a full frame into the slot. Returns the new sequence number.
    pub fn publish(&self, pixels: &[u8]) -> Result<u64, FrameError> {
        let dims = self.dims();
        if !dims.is_ready() {
            return Err(FrameError::NotReady);
        }
        if pixels.len() != dims.len() {
            return Err(FrameError::DimensionMismatch {
                expected: dims.len(),
                actual: pixels.len(),
            });
        }

        let mut slot = self.lock();
        slot.data.copy_from_slice(pixels);
        slot.sequence += 1;
        Ok(slot.sequence)
    }

    /// Copies the latest frame out, or `None` until the first publish.
    pub fn snapshot(&self) -> Option<Frame> {
        let dims = self.dims();
        if !dims.is_ready() {
            debug!("Snapshot requested before frame broker was described");
            return None;
        }

        let slot = self.lock();
        if slot.sequence == 0 {
            return None;
        }
        Some(Frame {
            dims,
            data: slot.data.clone(),
            sequence: slot.sequence,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }
}

impl Default for FrameBroker {
    fn default() -> Self {
        Self::new()
    }
}
