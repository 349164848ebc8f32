use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::wav;
use crate::worker::RunFlag;

const CHANNEL_CAPACITY: usize = 256;

/// Continuous mono microphone feed.
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// Waits up to `timeout` for the next chunk; `None` when nothing arrived.
    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<f32>>>;

    /// Drops everything buffered so far.
    fn clear(&mut self);
}

/// `cpal` input stream owned by a dedicated thread and fanned out over a
/// broadcast channel.
pub struct MicCapture {
    audio_rx: broadcast::Receiver<Vec<f32>>,
    sample_rate: u32,
    run: RunFlag,
}

impl MicCapture {
    pub fn start(sample_rate: u32) -> Result<Self> {
        let (audio_tx, audio_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::channel();
        let run = RunFlag::new();

        let thread_run = run.clone();
        thread::Builder::new()
            .name("mic".to_string())
            .spawn(move || {
                let stream = match Self::open_stream(sample_rate, audio_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while thread_run.is_running() {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                info!("Audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Audio capture thread exited during start-up"))??;
        info!("Audio capture started at {} Hz", sample_rate);

        Ok(Self {
            audio_rx,
            sample_rate,
            run,
        })
    }

    fn open_stream(
        sample_rate: u32,
        audio_tx: broadcast::Sender<Vec<f32>>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device found"))?;
        info!("Using input device: {}", device.name()?);

        let exact = device.supported_input_configs()?.find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        });
        let (config, format): (StreamConfig, SampleFormat) = match exact {
            Some(c) => {
                let format = c.sample_format();
                (c.with_sample_rate(SampleRate(sample_rate)).config(), format)
            }
            None => {
                let default = device.default_input_config()?;
                warn!(
                    "No mono {} Hz input config, converting from {:?}",
                    sample_rate, default
                );
                (default.config(), default.sample_format())
            }
        };

        let channels = config.channels;
        let device_rate = config.sample_rate.0;
        let forward = move |samples: Vec<f32>| {
            let pcm = wav::Pcm {
                samples,
                sample_rate: device_rate,
                channels,
            };
            let mono = wav::resample(&pcm.to_mono(), device_rate, sample_rate);
            // no receivers is fine
            let _ = audio_tx.send(mono);
        };
        let on_error = |err| error!("Audio stream error: {}", err);

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| forward(data.to_vec()),
                on_error,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    forward(data.iter().map(|&s| s as f32 / i16::MAX as f32).collect())
                },
                on_error,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    forward(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect())
                },
                on_error,
                None,
            )?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };
        stream.play()?;
        Ok(stream)
    }
}

impl AudioSource for MicCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<f32>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.audio_rx.try_recv() {
                Ok(chunk) => return Ok(Some(chunk)),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Audio consumer lagged, skipped {} chunks", n);
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(anyhow!("Audio capture stream closed"));
                }
            }
        }
    }

    fn clear(&mut self) {
        let mut dropped = 0;
        loop {
            match self.audio_rx.try_recv() {
                Ok(_) => dropped += 1,
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        debug!("Discarded {} buffered audio chunks", dropped);
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.run.stop();
    }
}
