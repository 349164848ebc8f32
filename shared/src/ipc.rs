use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::events::{EventQuery, EventRecord};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Toggle(ModeFlag),
    Jog { axis: Axis, direction: i32 },
    SetVolume(f32),
    Detections(DetectorKind),
    Events(EventQuery),
    /// Turns the connection into a frame stream: one `Response::Frame` line
    /// followed by the raw pixel bytes, per tick.
    WatchFrames { interval_ms: u64 },
}

impl Command {
    /// Commands that mutate daemon state and are subject to rate limiting.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Toggle(_) | Command::Jog { .. } | Command::SetVolume(_)
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Status(StatusInfo),
    Flag { flag: ModeFlag, enabled: bool },
    Jogged { axis: Axis, angle: i32, clamped: bool },
    Volume(f32),
    Detections(DetectionResult),
    Events(Vec<EventRecord>),
    Frame(FrameHeader),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModeFlag {
    FaceDetection,
    FaceTracking,
    DangerDetection,
    FaceOverlay,
    VoiceWake,
}

impl ModeFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeFlag::FaceDetection => "face_detection",
            ModeFlag::FaceTracking => "face_tracking",
            ModeFlag::DangerDetection => "danger_detection",
            ModeFlag::FaceOverlay => "face_overlay",
            ModeFlag::VoiceWake => "voice_wake",
        }
    }
}

impl fmt::Display for ModeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face_detection" => Ok(ModeFlag::FaceDetection),
            "face_tracking" => Ok(ModeFlag::FaceTracking),
            "danger_detection" => Ok(ModeFlag::DangerDetection),
            "face_overlay" => Ok(ModeFlag::FaceOverlay),
            "voice_wake" => Ok(ModeFlag::VoiceWake),
            other => Err(format!("unknown flag: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" | "horizontal" | "pan" => Ok(Axis::Horizontal),
            "v" | "vertical" | "tilt" => Ok(Axis::Vertical),
            other => Err(format!("unknown axis: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Face,
    Danger,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Face => "face",
            DetectorKind::Danger => "danger",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(DetectorKind::Face),
            "danger" => Ok(DetectorKind::Danger),
            other => Err(format!("unknown detector: {}", other)),
        }
    }
}

/// A single detector hit in frame pixel coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
}

impl Detection {
    pub fn is_well_formed(&self) -> bool {
        let [x1, y1, x2, y2] = self.bbox;
        self.bbox.iter().all(|v| v.is_finite())
            && x2 >= x1
            && y2 >= y1
            && self.confidence.is_finite()
    }

    pub fn centroid(&self) -> (i32, i32) {
        let [x1, y1, x2, y2] = self.bbox;
        (((x1 + x2) / 2.0) as i32, ((y1 + y2) / 2.0) as i32)
    }
}

/// Latest output of one detector. Last write wins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub boxes: Vec<[f32; 4]>,
    pub labels: Vec<String>,
    pub confidences: Vec<f32>,
}

impl DetectionResult {
    pub fn from_detections(detections: &[Detection]) -> Self {
        Self {
            boxes: detections.iter().map(|d| d.bbox).collect(),
            labels: detections.iter().map(|d| d.label.clone()).collect(),
            confidences: detections.iter().map(|d| d.confidence).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModeStatus {
    pub face_detection: bool,
    pub face_tracking: bool,
    pub danger_detection: bool,
    pub face_overlay: bool,
    pub voice_wake: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActuatorStatus {
    pub h_angle: i32,
    pub v_angle: i32,
    pub sleeping: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub is_running: bool,
    pub time: String,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub modes: ModeStatus,
    pub actuator: ActuatorStatus,
    pub volume: f32,
    pub voice_state: String,
    pub voice_busy: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u64,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    pub len: usize,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is sentryd running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed by daemon")]
    Closed,
}
