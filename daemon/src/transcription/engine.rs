//! Local whisper.cpp transcription, compiled with the `whisper` feature.

use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use super::Transcriber;
use crate::audio::wav;
use crate::config::SpeechConfig;

const WHISPER_SAMPLE_RATE: u32 = 16000;

pub struct WhisperEngine {
    _context: WhisperContext,
    state: WhisperState,
    language: String,
    min_audio_samples: usize,
    sampling_strategy: String,
}

impl WhisperEngine {
    pub fn load(model_path: &Path, config: &SpeechConfig) -> Result<Self> {
        let path = model_path
            .to_str()
            .ok_or_else(|| anyhow!("Model path is not UTF-8: {:?}", model_path))?;

        let use_gpu = match config.backend.to_lowercase().as_str() {
            "gpu" | "cuda" => true,
            "cpu" => false,
            other => {
                warn!("Invalid backend '{}', defaulting to CPU", other);
                false
            }
        };

        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu);
        let context = match WhisperContext::new_with_params(path, params) {
            Ok(ctx) => ctx,
            Err(e) if use_gpu => {
                warn!("GPU initialization failed: {}. Falling back to CPU", e);
                let mut cpu = WhisperContextParameters::default();
                cpu.use_gpu(false);
                WhisperContext::new_with_params(path, cpu)
                    .map_err(|e| anyhow!("Failed to load Whisper model: {}", e))?
            }
            Err(e) => return Err(anyhow!("Failed to load Whisper model: {}", e)),
        };
        let state = context
            .create_state()
            .map_err(|e| anyhow!("Failed to create Whisper state: {}", e))?;

        info!("Whisper model loaded from {:?}", model_path);
        Ok(Self {
            _context: context,
            state,
            language: config.language.clone(),
            min_audio_samples: config.min_audio_samples,
            sampling_strategy: config.sampling_strategy.clone(),
        })
    }

    fn sampling(&self) -> SamplingStrategy {
        match self.sampling_strategy.to_lowercase().as_str() {
            "beam" => SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0,
            },
            "greedy" => SamplingStrategy::Greedy { best_of: 1 },
            other => {
                warn!("Unknown sampling strategy '{}', using greedy", other);
                SamplingStrategy::Greedy { best_of: 1 }
            }
        }
    }
}

impl Transcriber for WhisperEngine {
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<String> {
        let mut audio = wav::resample(audio, sample_rate, WHISPER_SAMPLE_RATE);
        if audio.len() < self.min_audio_samples {
            audio.resize(self.min_audio_samples, 0.0);
        }

        let mut params = FullParams::new(self.sampling());
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(&self.language));

        self.state
            .full(params, &audio)
            .map_err(|e| anyhow!("Transcription failed: {}", e))?;

        let mut text = String::new();
        for i in 0..self.state.full_n_segments() {
            if let Some(segment) = self.state.get_segment(i) {
                if let Ok(s) = segment.to_str() {
                    text.push_str(s);
                }
            }
        }
        debug!("Whisper output: '{}'", text.trim());
        Ok(text.trim().to_string())
    }
}
