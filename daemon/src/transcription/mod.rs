pub mod http;
pub mod model;

#[cfg(feature = "whisper")]
pub mod engine;

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::{SpeechConfig, TimeoutsConfig};

pub use http::HttpTranscriber;
pub use model::ModelStore;

/// Speech-to-text capability.
pub trait Transcriber: Send {
    /// Returns the raw transcript of mono `audio`. An empty string means
    /// nothing intelligible was heard.
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<String>;
}

/// Builds the configured engine. A local model must already be present
/// (see [`ModelStore::ensure`]).
pub fn from_config(speech: &SpeechConfig, timeouts: &TimeoutsConfig) -> Result<Box<dyn Transcriber>> {
    match speech.engine.as_str() {
        "http" => Ok(Box::new(HttpTranscriber::new(
            speech,
            Duration::from_secs(timeouts.http_timeout_seconds),
        )?)),
        #[cfg(feature = "whisper")]
        "whisper" => {
            let path = model::find_model_path(&speech.model_url)?;
            Ok(Box::new(engine::WhisperEngine::load(&path, speech)?))
        }
        #[cfg(not(feature = "whisper"))]
        "whisper" => Err(anyhow!("sentryd was built without the `whisper` feature")),
        other => Err(anyhow!("unknown speech engine: {}", other)),
    }
}

fn noise_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)|（.*?）").expect("static regex"))
}

/// Removes engine annotations like `[BLANK_AUDIO]`, collapses repeated
/// words and whitespace.
pub fn post_process_transcription(text: &str) -> String {
    let stripped = noise_markers().replace_all(text, " ");

    let mut words: Vec<&str> = Vec::new();
    for word in stripped.split_whitespace() {
        if words.last() != Some(&word) {
            words.push(word);
        }
    }
    let cleaned = words.join(" ");
    tracing::debug!("Post-processed: '{}' -> '{}'", text.trim(), cleaned);
    cleaned
}
