//! Queued, strictly sequential audio output.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::tts::Synthesizer;
use super::wav::{self, Pcm};
use crate::state::SharedState;

/// Fixed spoken prompts shipped as WAV assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Acknowledge,
    PleaseWait,
    Rotated,
    NormalMode,
    MuteMode,
    SentryMode,
    PrivacyMode,
    FaceTracking,
    VoiceWake,
    DangerDetection,
    On,
    Off,
    NoIdea,
    Alarm,
    Error,
}

impl Cue {
    pub fn file_name(&self) -> &'static str {
        match self {
            Cue::Acknowledge => "iamhere.wav",
            Cue::PleaseWait => "please_wait.wav",
            Cue::Rotated => "rotated.wav",
            Cue::NormalMode => "normal_mode.wav",
            Cue::MuteMode => "mute_mode.wav",
            Cue::SentryMode => "sentry_mode.wav",
            Cue::PrivacyMode => "privacy_mode.wav",
            Cue::FaceTracking => "face_tracking.wav",
            Cue::VoiceWake => "voice_awake.wav",
            Cue::DangerDetection => "danger_detection.wav",
            Cue::On => "on.wav",
            Cue::Off => "off.wav",
            Cue::NoIdea => "noidea.wav",
            Cue::Alarm => "alarm.wav",
            Cue::Error => "error.wav",
        }
    }

    pub fn switch(enabled: bool) -> Cue {
        if enabled {
            Cue::On
        } else {
            Cue::Off
        }
    }
}

/// Anything that can make the device talk.
pub trait Speaker: Send + Sync {
    /// Queues a fixed cue. Never blocks on playback.
    fn play(&self, cue: Cue);

    /// Synthesizes `text` and queues the result.
    fn say(&self, text: &str) -> Result<()>;
}

/// Final stage that turns PCM into sound.
pub trait AudioSink: Send {
    fn play(&mut self, pcm: &Pcm, volume: f32) -> Result<()>;
}

enum Clip {
    Asset(PathBuf),
    Speech(Pcm),
}

/// Speaker backed by one playback thread draining a FIFO queue, so clips
/// never overlap.
pub struct AudioSpeaker {
    queue: Sender<Clip>,
    assets_dir: PathBuf,
    synthesizer: Option<Box<dyn Synthesizer>>,
}

impl AudioSpeaker {
    pub fn new(
        state: Arc<SharedState>,
        assets_dir: PathBuf,
        synthesizer: Option<Box<dyn Synthesizer>>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        let (queue, clips) = mpsc::channel();
        thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || Self::drain(clips, state, sink))?;

        info!("Audio playback ready, assets in {}", assets_dir.display());
        Ok(Self {
            queue,
            assets_dir,
            synthesizer,
        })
    }

    fn drain(clips: Receiver<Clip>, state: Arc<SharedState>, mut sink: Box<dyn AudioSink>) {
        for clip in clips {
            let pcm = match clip {
                Clip::Asset(path) => match wav::read(&path) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        warn!("Skipping cue {}: {:#}", path.display(), e);
                        continue;
                    }
                },
                Clip::Speech(pcm) => pcm,
            };
            let volume = state.volume();
            debug!("Playing {} ms clip at volume {:.2}", pcm.duration_ms(), volume);
            if let Err(e) = sink.play(&pcm, volume) {
                error!("Playback failed: {:#}", e);
            }
        }
        debug!("Playback queue closed");
    }

    fn enqueue(&self, clip: Clip) {
        if self.queue.send(clip).is_err() {
            error!("Playback thread is gone, dropping clip");
        }
    }
}

impl Speaker for AudioSpeaker {
    fn play(&self, cue: Cue) {
        self.enqueue(Clip::Asset(self.assets_dir.join(cue.file_name())));
    }

    fn say(&self, text: &str) -> Result<()> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| anyhow!("no speech synthesizer configured"))?;
        let bytes = synthesizer.synthesize(text)?;
        self.enqueue(Clip::Speech(wav::decode(&bytes)?));
        Ok(())
    }
}

/// Plays through the default `cpal` output device.
#[derive(Default)]
pub struct CpalSink;

impl CpalSink {
    fn pick_config(device: &cpal::Device, sample_rate: u32) -> Option<StreamConfig> {
        device
            .supported_output_configs()
            .ok()?
            .filter(|c| c.sample_format() == SampleFormat::F32)
            .find(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .map(|c| c.with_sample_rate(SampleRate(sample_rate)).config())
    }
}

impl AudioSink for CpalSink {
    fn play(&mut self, pcm: &Pcm, volume: f32) -> Result<()> {
        let mono = pcm.to_mono();
        if mono.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output device available"))?;

        let (config, samples) = match Self::pick_config(&device, pcm.sample_rate) {
            Some(config) => (config, mono),
            None => {
                let config = device.default_output_config()?.config();
                let resampled = wav::resample(&mono, pcm.sample_rate, config.sample_rate.0);
                (config, resampled)
            }
        };

        let channels = config.channels as usize;
        let total = samples.len();
        let rate = config.sample_rate.0;
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = match samples.get(pos) {
                            Some(s) => {
                                position.store(pos + 1, Ordering::Relaxed);
                                s * volume
                            }
                            None => {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            }
                        };
                        frame.fill(sample);
                    }
                },
                |err| error!("Audio output stream error: {}", err),
                None,
            )?
        };
        stream.play()?;

        let deadline = Instant::now()
            + Duration::from_millis(total as u64 * 1000 / rate.max(1) as u64 + 500);
        while !finished.load(Ordering::Relaxed) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        drop(stream);
        Ok(())
    }
}
