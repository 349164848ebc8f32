use anyhow::{anyhow, Result};
use chrono::Local;
use serde_json::json;
use shared::events::EventType;
use shared::ipc::{Axis, ModeFlag};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::intent::{self, ControlAction, Intent, Mode, QueryRequest};
use super::llm::ChatModel;
use super::wake::WakeSpotter;
use super::VoiceState;
use crate::actuator::ActuatorController;
use crate::audio::{wav, AudioSource, Cue, Speaker};
use crate::config::VoiceConfig;
use crate::events::EventLog;
use crate::state::SharedState;
use crate::transcription::{post_process_transcription, Transcriber};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Extra time allowed for the mic to deliver a fixed-length recording.
const RECORD_GRACE: Duration = Duration::from_secs(2);

/// External capabilities the pipeline drives.
pub struct VoiceCapabilities {
    pub source: Box<dyn AudioSource>,
    pub transcriber: Box<dyn Transcriber>,
    pub chat: Box<dyn ChatModel>,
    pub speaker: Arc<dyn Speaker>,
}

/// Resets the shared voice state to `Idle` however an interaction ends.
struct IdleOnDrop(Arc<SharedState>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.voice.set_state(VoiceState::Idle);
    }
}

/// How one interaction ended, for the event log.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NotHeard,
    NotUnderstood,
    Controlled(ControlAction),
    Answered { records: usize },
    Failed(String),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::NotHeard => "not_heard",
            Outcome::NotUnderstood => "not_understood",
            Outcome::Controlled(_) => "controlled",
            Outcome::Answered { .. } => "answered",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Single-flight voice command state machine.
///
/// Only one thread owns the pipeline and the microphone, so while an
/// interaction runs nothing listens for the wake word; audio buffered
/// meanwhile is discarded afterwards.
pub struct VoicePipeline {
    state: Arc<SharedState>,
    caps: VoiceCapabilities,
    actuator: ActuatorController,
    events: EventLog,
    spotter: WakeSpotter,
    record_samples: usize,
    recording_path: PathBuf,
}

impl VoicePipeline {
    pub fn new(
        state: Arc<SharedState>,
        config: &VoiceConfig,
        caps: VoiceCapabilities,
        actuator: ActuatorController,
        events: EventLog,
    ) -> Self {
        let record_samples = config.record_secs.max(1) as usize * caps.source.sample_rate() as usize;
        Self {
            state,
            spotter: WakeSpotter::new(config),
            caps,
            actuator,
            events,
            record_samples,
            recording_path: config.resolved_recording_path(),
        }
    }

    /// Reads one chunk and runs a full interaction if it completes a wake
    /// word. Returns whether an interaction ran.
    pub fn poll(&mut self) -> Result<bool> {
        let Some(chunk) = self.caps.source.next_chunk(POLL_TIMEOUT)? else {
            return Ok(false);
        };

        if !self.state.modes.get(ModeFlag::VoiceWake) {
            self.spotter.reset();
            return Ok(false);
        }

        let Some(candidate) = self.spotter.feed(&chunk) else {
            return Ok(false);
        };
        let rate = self.caps.source.sample_rate();
        let heard = self.caps.transcriber.transcribe(&candidate, rate)?;
        if !self.spotter.matches(&post_process_transcription(&heard)) {
            return Ok(false);
        }

        info!("Wake word detected");
        self.interact();
        Ok(true)
    }

    /// Runs one interaction from acknowledgement to dispatch. Always ends in
    /// `Idle` with a spoken outcome.
    pub fn interact(&mut self) -> Outcome {
        let _idle = IdleOnDrop(Arc::clone(&self.state));
        self.set_state(VoiceState::WakeDetected);
        self.caps.speaker.play(Cue::Acknowledge);

        let (transcript, outcome) = self.run_interaction();
        match &outcome {
            Outcome::NotHeard | Outcome::NotUnderstood => self.caps.speaker.play(Cue::NoIdea),
            Outcome::Failed(reason) => {
                error!("Voice command failed: {}", reason);
                self.caps.speaker.play(Cue::Error);
            }
            Outcome::Controlled(_) | Outcome::Answered { .. } => {}
        }

        if let Some(transcript) = transcript {
            let detail = json!({
                "transcript": transcript,
                "outcome": outcome.label(),
            });
            if let Err(e) = self.events.append(EventType::VoiceCommand, Some(detail), None) {
                warn!("Failed to record voice command: {}", e);
            }
        }

        self.caps.source.clear();
        self.spotter.reset();
        info!("Voice interaction finished: {:?}", outcome);
        outcome
    }

    fn set_state(&self, state: VoiceState) {
        debug!("Voice state -> {}", state.as_str());
        self.state.voice.set_state(state);
    }

    fn run_interaction(&mut self) -> (Option<String>, Outcome) {
        self.set_state(VoiceState::Recording);
        let audio = match self.record() {
            Ok(audio) => audio,
            Err(e) => return (None, Outcome::Failed(format!("recording: {:#}", e))),
        };
        let rate = self.caps.source.sample_rate();
        if let Err(e) = wav::write(&self.recording_path, &audio, rate) {
            warn!("Could not save recording to {:?}: {:#}", self.recording_path, e);
        }
        self.caps.speaker.play(Cue::PleaseWait);

        self.set_state(VoiceState::Transcribing);
        let text = match self.caps.transcriber.transcribe(&audio, rate) {
            Ok(text) => post_process_transcription(&text),
            Err(e) => {
                warn!("Transcription failed: {:#}", e);
                return (None, Outcome::NotHeard);
            }
        };
        if text.is_empty() {
            info!("Empty transcript");
            return (None, Outcome::NotHeard);
        }
        info!("Heard: {}", text);

        self.set_state(VoiceState::IntentParsing);
        let now = Local::now().naive_local();
        let reply = match self.caps.chat.chat(&intent::command_prompt(now), &text) {
            Ok(reply) => reply,
            Err(e) => return (Some(text), Outcome::Failed(format!("intent model: {:#}", e))),
        };
        let parsed = match intent::parse_reply(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Could not parse intent reply {:?}: {}", reply, e);
                return (Some(text), Outcome::NotUnderstood);
            }
        };

        self.set_state(VoiceState::Dispatching);
        let outcome = match self.dispatch(parsed) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(format!("dispatch: {:#}", e)),
        };
        (Some(text), outcome)
    }

    /// Fixed-length capture; no early exit on silence.
    fn record(&mut self) -> Result<Vec<f32>> {
        let rate = self.caps.source.sample_rate().max(1);
        let deadline = Instant::now()
            + Duration::from_millis(self.record_samples as u64 * 1000 / rate as u64)
            + RECORD_GRACE;

        let mut audio = Vec::with_capacity(self.record_samples);
        while audio.len() < self.record_samples {
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "microphone delivered {} of {} samples",
                    audio.len(),
                    self.record_samples
                ));
            }
            if let Some(chunk) = self.caps.source.next_chunk(POLL_TIMEOUT)? {
                audio.extend_from_slice(&chunk);
            }
        }
        audio.truncate(self.record_samples);
        debug!("Recorded {} samples", audio.len());
        Ok(audio)
    }

    fn dispatch(&mut self, intent: Intent) -> Result<Outcome> {
        match intent {
            Intent::Control(action) => {
                self.control(action)?;
                Ok(Outcome::Controlled(action))
            }
            Intent::Query(request) => self.answer(&request),
            Intent::Unrecognized => Ok(Outcome::NotUnderstood),
        }
    }

    fn control(&self, action: ControlAction) -> Result<()> {
        let speaker = &self.caps.speaker;
        let modes = &self.state.modes;
        match action {
            ControlAction::Rotate { h, v } => {
                let mut failure = None;
                for (axis, steps) in [(Axis::Horizontal, h), (Axis::Vertical, v)] {
                    if steps == 0 {
                        continue;
                    }
                    if let Err(e) = self.actuator.jog(axis, steps) {
                        warn!("[voice] rotate {:?} failed: {}", axis, e);
                        failure.get_or_insert(e);
                    }
                }
                if let Some(e) = failure {
                    return Err(e.into());
                }
                info!("[voice] rotate h={} v={}", h, v);
                speaker.play(if h != 0 || v != 0 { Cue::Rotated } else { Cue::NoIdea });
            }
            ControlAction::SwitchMode(Mode::Privacy) => {
                // detectors stop even if the mount cannot reach the park position
                modes.set(ModeFlag::FaceTracking, false);
                modes.set(ModeFlag::DangerDetection, false);
                self.actuator.park()?;
                info!("[voice] privacy mode");
                speaker.play(Cue::PrivacyMode);
            }
            ControlAction::SwitchMode(mode) => {
                modes.set(ModeFlag::FaceTracking, true);
                modes.set(ModeFlag::DangerDetection, true);
                info!("[voice] mode {:?}", mode);
                speaker.play(match mode {
                    Mode::Normal => Cue::NormalMode,
                    Mode::Mute => Cue::MuteMode,
                    _ => Cue::SentryMode,
                });
            }
            ControlAction::SetFlag { flag, enabled } => {
                modes.set(flag, enabled);
                info!("[voice] {} -> {}", flag, enabled);
                speaker.play(match flag {
                    ModeFlag::FaceTracking => Cue::FaceTracking,
                    ModeFlag::VoiceWake => Cue::VoiceWake,
                    _ => Cue::DangerDetection,
                });
                speaker.play(Cue::switch(enabled));
            }
        }
        Ok(())
    }

    fn answer(&self, request: &QueryRequest) -> Result<Outcome> {
        let records = self.events.query(&request.to_event_query())?;
        info!(
            "[voice] query {} .. {} matched {} events",
            request.start,
            request.end,
            records.len()
        );
        let summary = self.caps.chat.chat(
            intent::SUMMARY_SYSTEM_PROMPT,
            &intent::summary_prompt(request, &records),
        )?;
        self.caps.speaker.say(summary.trim())?;
        Ok(Outcome::Answered {
            records: records.len(),
        })
    }
}
