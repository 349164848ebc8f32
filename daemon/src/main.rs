use anyhow::{Context, Result};
use sentryd::actuator::{driver, ActuatorController};
use sentryd::audio::{AudioSpeaker, CpalSink, HttpSynthesizer, MicCapture, Speaker, Synthesizer};
use sentryd::config::{self, Config};
use sentryd::detection::{DetectionWorker, HttpDetector};
use sentryd::events::EventLog;
use sentryd::frame::{CaptureWorker, FfmpegCamera, FrameBroker};
use sentryd::rate_limit::ControlRateLimiter;
use sentryd::sensors::SensorPoller;
use sentryd::server::{ControlContext, DaemonServer};
use sentryd::state::SharedState;
use sentryd::transcription;
use sentryd::voice::pipeline::VoiceCapabilities;
use sentryd::voice::{ChatClient, VoicePipeline};
use sentryd::worker::{spawn_polling, RunFlag};
use shared::ipc::DetectorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("sentry daemon (sentryd) starting...");

    let config = config::load_config()?;
    // Blocking HTTP clients live on worker threads, so the runtime only
    // serves the control socket and model downloads.
    let runtime = tokio::runtime::Runtime::new()?;
    let state = Arc::new(SharedState::new(&config.modes, &config.audio));
    let run = RunFlag::new();
    let http_timeout = Duration::from_secs(config.timeouts.http_timeout_seconds);
    let events_path = config.events.resolved_path();
    info!("Event log at {}", events_path.display());

    let broker = Arc::new(FrameBroker::new());
    let capture = CaptureWorker::new(
        Box::new(FfmpegCamera::new(&config.camera)),
        Arc::clone(&broker),
        Duration::from_millis(config.camera.retry_ms),
    )?;
    {
        let run = run.clone();
        thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture.run(run))?;
    }

    let actuator = ActuatorController::new(
        Arc::clone(&state),
        driver::from_config(&config.actuator)?,
        config.actuator.clone(),
    );

    let synthesizer = match HttpSynthesizer::new(&config.speech, http_timeout) {
        Ok(s) => Some(Box::new(s) as Box<dyn Synthesizer>),
        Err(e) => {
            warn!("Speech synthesis unavailable: {:#}", e);
            None
        }
    };
    let speaker: Arc<dyn Speaker> = Arc::new(AudioSpeaker::new(
        Arc::clone(&state),
        PathBuf::from(&config.voice.assets_dir),
        synthesizer,
        Box::new(CpalSink),
    )?);

    spawn_detectors(&config, &state, &broker, &actuator, &speaker, &run)?;

    if config.voice.enabled {
        spawn_voice(&config, &runtime, &state, &actuator, &speaker, &run)?;
    } else {
        info!("Voice commands disabled in config");
    }

    let mut sensors = SensorPoller::from_config(Arc::clone(&state), &config.sensors);
    if sensors.is_configured() {
        spawn_polling(
            "sensors",
            Duration::from_secs(config.sensors.poll_interval_secs.max(1)),
            run.clone(),
            move || sensors.tick(),
        )?;
    }

    let context = Arc::new(ControlContext {
        state: Arc::clone(&state),
        broker: Arc::clone(&broker),
        actuator: actuator.clone(),
        events: Arc::new(Mutex::new(EventLog::open(&events_path)?)),
        limiter: ControlRateLimiter::from_config(&config.rate_limit),
    });
    let server = DaemonServer::new(config.server.resolved_socket_path(), context);

    runtime.block_on(async {
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                Ok(())
            }
        }
    })?;

    run.stop();
    drop(server);
    info!("sentryd stopped");
    Ok(())
}

fn spawn_detectors(
    config: &Config,
    state: &Arc<SharedState>,
    broker: &Arc<FrameBroker>,
    actuator: &ActuatorController,
    speaker: &Arc<dyn Speaker>,
    run: &RunFlag,
) -> Result<()> {
    let detector_timeout = Duration::from_millis(config.timeouts.detector_timeout_ms);
    let interval = Duration::from_millis(config.detection.poll_interval_ms);

    for kind in [DetectorKind::Face, DetectorKind::Danger] {
        let detector_config = match kind {
            DetectorKind::Face => &config.detection.face,
            DetectorKind::Danger => &config.detection.danger,
        };
        let detector = HttpDetector::new(kind, detector_config, detector_timeout)?;
        let events = EventLog::open(&config.events.resolved_path())?;
        let worker = DetectionWorker::new(
            kind,
            Box::new(detector),
            Arc::clone(broker),
            Arc::clone(state),
            events,
            &config.detection,
        );
        let mut worker = match kind {
            DetectorKind::Face => worker.with_actuator(actuator.clone()),
            DetectorKind::Danger => worker.with_speaker(Arc::clone(speaker)),
        };
        spawn_polling(kind.as_str(), interval, run.clone(), move || {
            worker.tick().map(|_| ())
        })?;
    }
    Ok(())
}

fn spawn_voice(
    config: &Config,
    runtime: &tokio::runtime::Runtime,
    state: &Arc<SharedState>,
    actuator: &ActuatorController,
    speaker: &Arc<dyn Speaker>,
    run: &RunFlag,
) -> Result<()> {
    if config.speech.engine == "whisper" {
        let store = transcription::ModelStore::new(
            &config.speech.model_url,
            config.speech.model_checksum.clone(),
            Duration::from_secs(config.timeouts.model_download_timeout_seconds),
        )?;
        runtime.block_on(store.ensure())?;
    }

    // A device without a microphone still runs everything else.
    let source = match MicCapture::start(config.voice.sample_rate) {
        Ok(source) => source,
        Err(e) => {
            warn!("Voice commands unavailable: {:#}", e);
            return Ok(());
        }
    };

    let http_timeout = Duration::from_secs(config.timeouts.http_timeout_seconds);
    let caps = VoiceCapabilities {
        source: Box::new(source),
        transcriber: transcription::from_config(&config.speech, &config.timeouts)?,
        chat: Box::new(ChatClient::new(&config.llm, http_timeout)?),
        speaker: Arc::clone(speaker),
    };
    let events = EventLog::open(&config.events.resolved_path())
        .context("failed to open event log for voice commands")?;
    let mut pipeline = VoicePipeline::new(
        Arc::clone(state),
        &config.voice,
        caps,
        actuator.clone(),
        events,
    );

    // next_chunk blocks for up to its poll timeout, so no extra sleep
    spawn_polling("voice", Duration::ZERO, run.clone(), move || {
        pipeline.poll().map(|_| ())
    })?;
    Ok(())
}
