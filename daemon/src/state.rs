//! Process-wide shared state.
//!
//! Every field is individually consistent: flags and actuator fields are
//! atomics, each detector owns its own result slot. Nothing here is
//! transactional across fields; a reader may see one flag change moments
//! after reading another.

use crate::config::{AudioConfig, ModesConfig};
use crate::voice::VoiceState;
use shared::ipc::{ActuatorStatus, DetectionResult, DetectorKind, ModeFlag, ModeStatus, StatusInfo};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct ModeFlags {
    face_detection: AtomicBool,
    face_tracking: AtomicBool,
    danger_detection: AtomicBool,
    face_overlay: AtomicBool,
    voice_wake: AtomicBool,
}

impl ModeFlags {
    pub fn new(initial: &ModesConfig) -> Self {
        Self {
            face_detection: AtomicBool::new(initial.face_detection),
            face_tracking: AtomicBool::new(initial.face_tracking),
            danger_detection: AtomicBool::new(initial.danger_detection),
            face_overlay: AtomicBool::new(initial.face_overlay),
            voice_wake: AtomicBool::new(initial.voice_wake),
        }
    }

    fn slot(&self, flag: ModeFlag) -> &AtomicBool {
        match flag {
            ModeFlag::FaceDetection => &self.face_detection,
            ModeFlag::FaceTracking => &self.face_tracking,
            ModeFlag::DangerDetection => &self.danger_detection,
            ModeFlag::FaceOverlay => &self.face_overlay,
            ModeFlag::VoiceWake => &self.voice_wake,
        }
    }

    pub fn get(&self, flag: ModeFlag) -> bool {
        self.slot(flag).load(Ordering::Relaxed)
    }

    pub fn set(&self, flag: ModeFlag, enabled: bool) {
        self.slot(flag).store(enabled, Ordering::Relaxed);
        tracing::info!("Mode flag {} set to {}", flag, enabled);
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self, flag: ModeFlag) -> bool {
        let enabled = !self.slot(flag).fetch_xor(true, Ordering::Relaxed);
        tracing::info!("Mode flag {} toggled to {}", flag, enabled);
        enabled
    }

    pub fn snapshot(&self) -> ModeStatus {
        ModeStatus {
            face_detection: self.get(ModeFlag::FaceDetection),
            face_tracking: self.get(ModeFlag::FaceTracking),
            danger_detection: self.get(ModeFlag::DangerDetection),
            face_overlay: self.get(ModeFlag::FaceOverlay),
            voice_wake: self.get(ModeFlag::VoiceWake),
        }
    }
}

pub struct ActuatorState {
    pub h_angle: AtomicI32,
    pub v_angle: AtomicI32,
    pub last_activity_ms: AtomicU64,
    pub sleeping: AtomicBool,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self {
            h_angle: AtomicI32::new(0),
            v_angle: AtomicI32::new(0),
            last_activity_ms: AtomicU64::new(now_millis()),
            sleeping: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> ActuatorStatus {
        ActuatorStatus {
            h_angle: self.h_angle.load(Ordering::Relaxed),
            v_angle: self.v_angle.load(Ordering::Relaxed),
            sleeping: self.sleeping.load(Ordering::Relaxed),
        }
    }
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// An optional f32 stored as raw bits; NaN means "no reading".
struct OptionalF32(AtomicU32);

impl OptionalF32 {
    fn none() -> Self {
        Self(AtomicU32::new(f32::NAN.to_bits()))
    }

    fn load(&self) -> Option<f32> {
        let value = f32::from_bits(self.0.load(Ordering::Relaxed));
        (!value.is_nan()).then_some(value)
    }

    fn store(&self, value: Option<f32>) {
        self.0
            .store(value.unwrap_or(f32::NAN).to_bits(), Ordering::Relaxed);
    }
}

pub struct SensorSlot {
    temperature: OptionalF32,
    humidity: OptionalF32,
}

impl SensorSlot {
    fn new() -> Self {
        Self {
            temperature: OptionalF32::none(),
            humidity: OptionalF32::none(),
        }
    }

    pub fn update(&self, temperature: Option<f32>, humidity: Option<f32>) {
        self.temperature.store(temperature);
        self.humidity.store(humidity);
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature.load()
    }

    pub fn humidity(&self) -> Option<f32> {
        self.humidity.load()
    }
}

pub struct VoiceStatus {
    state: AtomicU8,
    busy: AtomicBool,
}

impl VoiceStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(VoiceState::Idle as u8),
            busy: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> VoiceState {
        VoiceState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: VoiceState) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.busy
            .store(state != VoiceState::Idle, Ordering::Relaxed);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

pub struct SharedState {
    pub modes: ModeFlags,
    pub actuator: ActuatorState,
    pub sensors: SensorSlot,
    pub voice: VoiceStatus,
    volume: AtomicU32,
    face_result: Mutex<DetectionResult>,
    danger_result: Mutex<DetectionResult>,
}

impl SharedState {
    pub fn new(modes: &ModesConfig, audio: &AudioConfig) -> Self {
        Self {
            modes: ModeFlags::new(modes),
            actuator: ActuatorState::new(),
            sensors: SensorSlot::new(),
            voice: VoiceStatus::new(),
            volume: AtomicU32::new(audio.volume.clamp(0.0, 1.0).to_bits()),
            face_result: Mutex::new(DetectionResult::default()),
            danger_result: Mutex::new(DetectionResult::default()),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Stores the volume clamped to [0, 1] and returns the stored value.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        volume
    }

    fn result_slot(&self, kind: DetectorKind) -> &Mutex<DetectionResult> {
        match kind {
            DetectorKind::Face => &self.face_result,
            DetectorKind::Danger => &self.danger_result,
        }
    }

    pub fn result(&self, kind: DetectorKind) -> DetectionResult {
        self.result_slot(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_result(&self, kind: DetectorKind, result: DetectionResult) {
        *self
            .result_slot(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = result;
    }

    pub fn get_status(&self) -> StatusInfo {
        StatusInfo {
            is_running: true,
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            temperature: self.sensors.temperature(),
            humidity: self.sensors.humidity(),
            modes: self.modes.snapshot(),
            actuator: self.actuator.snapshot(),
            volume: self.volume(),
            voice_state: self.voice.state().as_str().to_string(),
            voice_busy: self.voice.is_busy(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(&ModesConfig::default(), &AudioConfig::default())
    }
}
