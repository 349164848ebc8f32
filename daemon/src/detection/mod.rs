pub mod debounce;
pub mod worker;

pub use debounce::{Debouncer, Transition};
pub use worker::{DetectionWorker, TickOutcome};

use anyhow::{anyhow, Context, Result};
use shared::ipc::{Detection, DetectorKind};
use std::time::Duration;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::frame::Frame;

/// Frame in, zero or more boxes out.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Rejects any result containing a box that cannot be drawn.
pub fn validate(detections: Vec<Detection>) -> Result<Vec<Detection>> {
    if let Some(bad) = detections.iter().find(|d| !d.is_well_formed()) {
        return Err(anyhow!("malformed detection: {:?}", bad));
    }
    Ok(detections)
}

/// Posts raw frames to a detection service.
///
/// The body is the BGR pixel buffer; dimensions travel in headers. The
/// service answers with a JSON array of `{bbox, label, confidence}`.
pub struct HttpDetector {
    kind: DetectorKind,
    endpoint: String,
    min_confidence: f32,
    client: reqwest::blocking::Client,
}

impl HttpDetector {
    pub fn new(kind: DetectorKind, config: &DetectorConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build detector HTTP client")?;
        Ok(Self {
            kind,
            endpoint: config.endpoint.clone(),
            min_confidence: config.min_confidence,
            client,
        })
    }
}

impl Detector for HttpDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .header("X-Frame-Width", frame.dims.width)
            .header("X-Frame-Height", frame.dims.height)
            .header("X-Frame-Channels", frame.dims.channels)
            .body(frame.data.clone())
            .send()
            .with_context(|| format!("{} detector unreachable at {}", self.kind, self.endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} detector returned {}", self.kind, response.status()));
        }

        let detections: Vec<Detection> = response
            .json()
            .with_context(|| format!("{} detector sent an unreadable body", self.kind))?;
        let detections = validate(detections)?;
        debug!("{} detector returned {} boxes", self.kind, detections.len());

        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .collect())
    }
}
