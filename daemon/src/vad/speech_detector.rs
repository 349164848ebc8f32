use tracing::{debug, info};

use super::detector::VoiceActivityDetector;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechState {
    Idle,
    Speaking,
    SilenceDetected,
}

/// Cuts a continuous sample stream into utterances.
///
/// Timing is counted in samples rather than wall-clock time, so the result
/// depends only on the audio fed in. An utterance ends after
/// `silence_ms` of quiet or once it reaches `max_ms`.
pub struct SpeechDetector {
    state: SpeechState,
    vad: VoiceActivityDetector,
    speech_buffer: Vec<f32>,
    silent_samples: usize,
    silence_limit: usize,
    max_samples: usize,
    sample_rate: u32,
}

impl SpeechDetector {
    pub fn new(threshold: f32, silence_ms: u32, max_ms: u32, sample_rate: u32) -> Self {
        info!(
            "SpeechDetector initialized: threshold={:.4}, silence_ms={}, max_ms={}",
            threshold, silence_ms, max_ms
        );
        Self {
            state: SpeechState::Idle,
            vad: VoiceActivityDetector::new(threshold),
            speech_buffer: Vec::new(),
            silent_samples: 0,
            silence_limit: ms_to_samples(silence_ms, sample_rate),
            max_samples: ms_to_samples(max_ms, sample_rate),
            sample_rate,
        }
    }

    pub fn process_audio(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let vad_result = self.vad.detect(samples);

        match self.state {
            SpeechState::Idle => {
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.speech_buffer.extend_from_slice(samples);
                    debug!("State transition: Idle → Speaking");
                }
            }
            SpeechState::Speaking | SpeechState::SilenceDetected => {
                self.speech_buffer.extend_from_slice(samples);
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.silent_samples = 0;
                } else {
                    self.state = SpeechState::SilenceDetected;
                    self.silent_samples += samples.len();
                }

                if self.silent_samples >= self.silence_limit
                    || self.speech_buffer.len() >= self.max_samples
                {
                    let speech = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    debug!(
                        "Utterance complete: {} ms, {} samples",
                        speech.len() as u64 * 1000 / self.sample_rate.max(1) as u64,
                        speech.len()
                    );
                    return Some(speech);
                }
            }
        }

        None
    }

    /// Drops any partial utterance.
    pub fn reset(&mut self) {
        self.state = SpeechState::Idle;
        self.silent_samples = 0;
        self.speech_buffer.clear();
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            SpeechState::Speaking | SpeechState::SilenceDetected
        )
    }
}

fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}
