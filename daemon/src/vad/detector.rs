use tracing::debug;

/// Energy gate over one chunk of mono samples.
pub struct VoiceActivityDetector {
    threshold: f32,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn detect(&self, samples: &[f32]) -> VadResult {
        let level = rms(samples);
        let is_speech = level > self.threshold;
        debug!(
            "Audio level: {:.4}, threshold: {:.4}, is_speech: {}",
            level, self.threshold, is_speech
        );
        VadResult { is_speech, level }
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub is_speech: bool,
    pub level: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.5, 0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detect_against_threshold() {
        let vad = VoiceActivityDetector::new(0.02);
        assert!(!vad.detect(&[0.0; 160]).is_speech);
        assert!(!vad.detect(&[0.01; 160]).is_speech);
        let loud = vad.detect(&[0.3; 160]);
        assert!(loud.is_speech);
        assert!((loud.level - 0.3).abs() < 1e-6);
    }
}
