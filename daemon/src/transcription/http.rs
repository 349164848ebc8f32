use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::Transcriber;
use crate::audio::wav;
use crate::config::SpeechConfig;

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct HttpTranscriber {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    language: String,
}

impl HttpTranscriber {
    pub fn new(config: &SpeechConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/audio/transcriptions", config.base_url.trim_end_matches('/')),
            api_key: std::env::var(&config.api_key_env).ok(),
            model: config.stt_model.clone(),
            language: config.language.clone(),
        })
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&mut self, audio: &[f32], sample_rate: u32) -> Result<String> {
        let bytes = wav::encode(audio, sample_rate)?;
        let file = multipart::Part::bytes(bytes)
            .file_name("voice_cmd.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Transcription service returned {}", status));
        }
        let body: TranscriptionResponse = response.json()?;
        debug!("Transcription service returned '{}'", body.text);
        Ok(body.text)
    }
}
