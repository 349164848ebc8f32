pub mod detector;
pub mod speech_detector;

pub use detector::{rms, VadResult, VoiceActivityDetector};
pub use speech_detector::{SpeechDetector, SpeechState};
