pub mod actuator;
pub mod audio;
pub mod config;
pub mod detection;
pub mod events;
pub mod frame;
pub mod rate_limit;
pub mod sensors;
pub mod server;
pub mod state;
pub mod transcription;
pub mod vad;
pub mod voice;
pub mod worker;

pub use actuator::ActuatorController;
pub use detection::{DetectionWorker, Detector, HttpDetector};
pub use events::EventLog;
pub use frame::{CaptureWorker, FrameBroker};
pub use rate_limit::ControlRateLimiter;
pub use server::{ControlContext, DaemonServer};
pub use state::SharedState;
pub use vad::detector::VoiceActivityDetector;
pub use vad::speech_detector::SpeechDetector;
pub use voice::VoicePipeline;
pub use worker::RunFlag;
