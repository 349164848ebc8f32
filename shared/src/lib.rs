pub mod events;
pub mod ipc;

pub use events::{EventCategory, EventFilter, EventQuery, EventRecord, EventType};
pub use ipc::{
    ActuatorStatus, Axis, Command, Detection, DetectionResult, DetectorKind, FrameHeader,
    IpcError, ModeFlag, ModeStatus, Response, StatusInfo,
};
