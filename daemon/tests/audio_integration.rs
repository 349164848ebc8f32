mod common;

#[cfg(test)]
mod tests {
    use crate::common::confirm_action;
    use crate::common::print_error;
    use crate::common::print_header;
    use crate::common::print_info;
    use crate::common::print_success;
    use sentryd::audio::wav::{self, Pcm};
    use sentryd::audio::{AudioSink, AudioSource, CpalSink, MicCapture};
    use sentryd::vad::rms;
    use serial_test::serial;
    use std::f32::consts::PI;
    use std::time::{Duration, Instant};

    const RATE: u32 = 16000;

    #[test]
    #[serial]
    #[ignore = "Requires microphone and user interaction"]
    fn test_microphone_continuous_capture() {
        print_header("Microphone Continuous Capture");

        print_info("This test verifies the microphone delivers audio continuously.");

        if !confirm_action("Ready to test continuous capture? (y/n)") {
            return;
        }

        let mut mic = match MicCapture::start(RATE) {
            Ok(mic) => mic,
            Err(e) => {
                print_error(&format!(
                    "Failed to open microphone: {:#}. Check microphone permissions.",
                    e
                ));
                return;
            }
        };

        print_info("Capturing for 3 seconds...");
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut samples = 0usize;
        let mut chunks = 0usize;
        while Instant::now() < deadline {
            if let Ok(Some(chunk)) = mic.next_chunk(Duration::from_millis(100)) {
                samples += chunk.len();
                chunks += 1;
            }
        }

        if chunks == 0 {
            print_error("No audio chunks received");
            return;
        }
        // mic delivers at the requested rate after resampling
        let seconds = samples as f32 / mic.sample_rate() as f32;
        print_success(&format!(
            "Received {} chunks, {:.2} s of audio in 3 s",
            chunks, seconds
        ));
        assert!(seconds > 2.0 && seconds < 4.0);
    }

    #[test]
    #[serial]
    #[ignore = "Requires microphone and user interaction"]
    fn test_microphone_record_to_wav() {
        print_header("Microphone Recording");

        if !confirm_action("Speak for 2 seconds after confirming (y/n)") {
            return;
        }

        let mut mic = match MicCapture::start(RATE) {
            Ok(mic) => mic,
            Err(e) => {
                print_error(&format!("Failed to open microphone: {:#}", e));
                return;
            }
        };
        mic.clear();

        let mut recording = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(chunk)) = mic.next_chunk(Duration::from_millis(100)) {
                recording.extend(chunk);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.wav");
        wav::write(&path, &recording, RATE).unwrap();
        let read_back = wav::read(&path).unwrap();
        assert_eq!(read_back.sample_rate, RATE);
        assert_eq!(read_back.samples.len(), recording.len());

        print_info(&format!("Recorded level: {:.4}", rms(&recording)));
        print_success("Recording written and read back");
    }

    #[test]
    #[serial]
    #[ignore = "Requires speakers and user interaction"]
    fn test_speaker_tone_playback() {
        print_header("Speaker Playback");

        if !confirm_action("Play a one second 440 Hz tone at half volume? (y/n)") {
            return;
        }

        let tone = Pcm {
            samples: (0..RATE)
                .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / RATE as f32).sin())
                .collect(),
            sample_rate: RATE,
            channels: 1,
        };

        let mut sink = CpalSink;
        match sink.play(&tone, 0.5) {
            Ok(()) => {
                if confirm_action("Did you hear the tone? (y/n)") {
                    print_success("Playback works");
                } else {
                    print_error("Tone not heard; check the default output device and volume");
                }
            }
            Err(e) => print_error(&format!("Playback failed: {:#}", e)),
        }
    }
}
