use tracing::debug;

use crate::config::VoiceConfig;
use crate::vad::SpeechDetector;

/// Finds wake words: VAD cuts candidate utterances out of the mic stream,
/// the caller transcribes them and asks [`WakeSpotter::matches`].
pub struct WakeSpotter {
    detector: SpeechDetector,
    wake_words: Vec<String>,
}

impl WakeSpotter {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            detector: SpeechDetector::new(
                config.vad_threshold,
                config.wake_silence_ms,
                config.max_wake_ms,
                config.sample_rate,
            ),
            wake_words: config
                .wake_words
                .iter()
                .map(|w| normalize(w))
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// Feeds one chunk; returns a finished candidate utterance.
    pub fn feed(&mut self, chunk: &[f32]) -> Option<Vec<f32>> {
        self.detector.process_audio(chunk)
    }

    pub fn matches(&self, transcript: &str) -> bool {
        let heard = normalize(transcript);
        let hit = self.wake_words.iter().any(|w| heard.contains(w.as_str()));
        debug!("Wake candidate '{}' matched: {}", transcript, hit);
        hit
    }

    pub fn reset(&mut self) {
        self.detector.reset();
    }
}

/// Lowercase with whitespace and punctuation removed, so "Sentry!" and
/// "sen try" both match "sentry".
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
