mod common;

#[cfg(test)]
mod tests {
    use crate::common::confirm_action;
    use crate::common::print_error;
    use crate::common::print_header;
    use crate::common::print_info;
    use crate::common::print_success;
    use sentryd::audio::{AudioSource, MicCapture};
    use sentryd::config::VoiceConfig;
    use sentryd::vad::{rms, SpeechDetector};
    use sentryd::voice::wake::WakeSpotter;
    use std::f32::consts::PI;
    use std::time::{Duration, Instant};

    const RATE: u32 = 16000;
    const CHUNK: usize = 1600;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * 440.0 * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn feed_all(detector: &mut SpeechDetector, audio: &[f32]) -> Vec<Vec<f32>> {
        audio
            .chunks(CHUNK)
            .filter_map(|chunk| detector.process_audio(chunk))
            .collect()
    }

    #[test]
    fn test_two_utterances_separated_by_silence() {
        let mut detector = SpeechDetector::new(0.02, 300, 5000, RATE);
        let mut audio = Vec::new();
        audio.extend(vec![0.0; CHUNK * 3]);
        audio.extend(tone(CHUNK * 5, 0.3));
        audio.extend(vec![0.0; CHUNK * 4]);
        audio.extend(tone(CHUNK * 2, 0.3));
        audio.extend(vec![0.0; CHUNK * 4]);

        let utterances = feed_all(&mut detector, &audio);
        assert_eq!(utterances.len(), 2);
        // speech plus the trailing silence that closed it
        assert_eq!(utterances[0].len(), CHUNK * 5 + CHUNK * 3);
        assert_eq!(utterances[1].len(), CHUNK * 2 + CHUNK * 3);
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_continuous_speech_is_cut_at_max_length() {
        let mut detector = SpeechDetector::new(0.02, 300, 1000, RATE);
        let utterances = feed_all(&mut detector, &tone(CHUNK * 25, 0.3));
        assert_eq!(utterances.len(), 2);
        assert!(utterances.iter().all(|u| u.len() == RATE as usize));
    }

    #[test]
    fn test_wake_spotter_hands_back_candidate() {
        let config = VoiceConfig {
            wake_silence_ms: 200,
            ..VoiceConfig::default()
        };
        let mut spotter = WakeSpotter::new(&config);
        let mut audio = tone(CHUNK * 4, 0.2);
        audio.extend(vec![0.0; CHUNK * 3]);

        let candidates: Vec<Vec<f32>> = audio
            .chunks(CHUNK)
            .filter_map(|chunk| spotter.feed(chunk))
            .collect();
        assert_eq!(candidates.len(), 1);
        assert!(rms(&candidates[0]) > config.vad_threshold);
        assert!(spotter.matches("Sentry, are you there?"));
    }

    #[test]
    #[ignore = "Requires microphone and user interaction"]
    fn test_vad_threshold_tuning() {
        print_header("VAD Threshold Tuning");

        print_info("This test reports microphone levels so voice.vad_threshold can be tuned.");
        print_info("  - Higher = fewer false triggers, may miss quiet speech");
        print_info("  - Lower = more sensitive, may wake on background noise");

        if !confirm_action("Ready to start threshold tuning? (y/n)") {
            return;
        }

        let mut mic = match MicCapture::start(RATE) {
            Ok(mic) => mic,
            Err(e) => {
                print_error(&format!("Failed to open microphone: {:#}", e));
                return;
            }
        };

        for (phase, prompt) in [("silence", "Stay silent"), ("speech", "Say 'sentry' a few times")] {
            print_info(&format!("{} for 3 seconds...", prompt));
            mic.clear();
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut peak: f32 = 0.0;
            let mut total = 0.0;
            let mut chunks = 0;
            while Instant::now() < deadline {
                if let Ok(Some(chunk)) = mic.next_chunk(Duration::from_millis(100)) {
                    let level = rms(&chunk);
                    peak = peak.max(level);
                    total += level;
                    chunks += 1;
                }
            }
            if chunks == 0 {
                print_error("No audio received");
                return;
            }
            print_success(&format!(
                "{}: mean level {:.4}, peak {:.4}",
                phase,
                total / chunks as f32,
                peak
            ));
        }

        print_info("Pick a threshold between the silence peak and the speech mean.");
    }
}
