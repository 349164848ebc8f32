pub mod capture;
pub mod playback;
pub mod tts;
pub mod wav;

pub use capture::{AudioSource, MicCapture};
pub use playback::{AudioSink, AudioSpeaker, CpalSink, Cue, Speaker};
pub use tts::{HttpSynthesizer, Synthesizer};
