use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::SpeechConfig;

/// Text-to-speech capability. Returns a complete WAV file.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// OpenAI-compatible `/audio/speech` client.
pub struct HttpSynthesizer {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl HttpSynthesizer {
    pub fn new(config: &SpeechConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/audio/speech", config.base_url.trim_end_matches('/')),
            api_key: std::env::var(&config.api_key_env).ok(),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
        })
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(anyhow!("nothing to synthesize"));
        }
        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "wav",
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Speech service returned {}", status));
        }
        let bytes = response.bytes()?.to_vec();
        debug!("Synthesized {} chars into {} bytes", text.chars().count(), bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = SpeechRequest {
            model: "tts-1",
            voice: "alloy",
            input: "两点钟有人进入",
            response_format: "wav",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"], "wav");
        assert_eq!(json["input"], "两点钟有人进入");
    }

    #[test]
    fn test_blank_text_is_rejected_before_network() {
        let synth = HttpSynthesizer::new(&SpeechConfig::default(), Duration::from_secs(1)).unwrap();
        assert!(synth.synthesize("   ").is_err());
    }
}
