//! Voice command pipeline: wake word, fixed-length recording, transcription,
//! intent parsing and dispatch.

pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod wake;

pub use intent::{ControlAction, Intent, IntentError, Mode, QueryRequest, VoiceIntent};
pub use llm::{ChatClient, ChatModel};
pub use pipeline::VoicePipeline;
pub use wake::WakeSpotter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceState {
    Idle = 0,
    WakeDetected = 1,
    Recording = 2,
    Transcribing = 3,
    IntentParsing = 4,
    Dispatching = 5,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::WakeDetected => "wake_detected",
            VoiceState::Recording => "recording",
            VoiceState::Transcribing => "transcribing",
            VoiceState::IntentParsing => "intent_parsing",
            VoiceState::Dispatching => "dispatching",
        }
    }

    /// Unknown values read back as `Idle`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => VoiceState::WakeDetected,
            2 => VoiceState::Recording,
            3 => VoiceState::Transcribing,
            4 => VoiceState::IntentParsing,
            5 => VoiceState::Dispatching,
            _ => VoiceState::Idle,
        }
    }
}
