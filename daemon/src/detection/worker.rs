use anyhow::Result;
use serde_json::json;
use shared::events::EventType;
use shared::ipc::{Detection, DetectionResult, DetectorKind, ModeFlag};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::debounce::{Debouncer, Transition};
use super::Detector;
use crate::actuator::ActuatorController;
use crate::audio::{Cue, Speaker};
use crate::config::DetectionConfig;
use crate::events::EventLog;
use crate::frame::FrameBroker;
use crate::state::{now_millis, SharedState};

const FIRE_LABEL: &str = "fire";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The mode flags have this detector switched off.
    Disabled,
    /// Between cadence ticks.
    Waiting,
    /// The broker has no frame yet.
    NotReady,
    Detected(usize),
}

/// One polling detector: face or danger.
///
/// Owns its own event log connection and debounce window; the only shared
/// state it writes is its result slot and, for the face worker, the
/// actuator.
pub struct DetectionWorker {
    kind: DetectorKind,
    detector: Box<dyn Detector>,
    broker: Arc<FrameBroker>,
    state: Arc<SharedState>,
    events: EventLog,
    actuator: Option<ActuatorController>,
    speaker: Option<Arc<dyn Speaker>>,
    debouncer: Debouncer,
    cadence: u32,
    countdown: u32,
    fire_confidence: f32,
    fire_cooldown_ms: u64,
    last_alarm_ms: Option<u64>,
}

impl DetectionWorker {
    pub fn new(
        kind: DetectorKind,
        detector: Box<dyn Detector>,
        broker: Arc<FrameBroker>,
        state: Arc<SharedState>,
        events: EventLog,
        config: &DetectionConfig,
    ) -> Self {
        let cadence = match kind {
            DetectorKind::Face => config.face.cadence,
            DetectorKind::Danger => config.danger.cadence,
        }
        .max(1);

        Self {
            kind,
            detector,
            broker,
            state,
            events,
            actuator: None,
            speaker: None,
            debouncer: Debouncer::new(config.debounce_window),
            cadence,
            countdown: cadence,
            fire_confidence: config.fire_alarm_confidence,
            fire_cooldown_ms: config.fire_alarm_cooldown_secs * 1000,
            last_alarm_ms: None,
        }
    }

    /// Face worker only: steer toward the primary face and run the idle check.
    pub fn with_actuator(mut self, actuator: ActuatorController) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Danger worker only: where the fire alarm is played.
    pub fn with_speaker(mut self, speaker: Arc<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        let modes = &self.state.modes;
        match self.kind {
            DetectorKind::Face => {
                modes.get(ModeFlag::FaceDetection) || modes.get(ModeFlag::FaceTracking)
            }
            DetectorKind::Danger => modes.get(ModeFlag::DangerDetection),
        }
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_at(now_millis())
    }

    /// One poll. A detector error propagates before anything is written, so
    /// the previous result stays in place. Actuator faults are logged and
    /// never stop detection or event logging.
    pub fn tick_at(&mut self, now_ms: u64) -> Result<TickOutcome> {
        if let Some(actuator) = &self.actuator {
            if let Err(e) = actuator.check_idle_at(now_ms) {
                warn!("[{}] actuator idle check failed: {}", self.kind, e);
            }
        }

        if !self.enabled() {
            return Ok(TickOutcome::Disabled);
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return Ok(TickOutcome::Waiting);
        }
        self.countdown = self.cadence;

        let frame = match self.broker.snapshot() {
            Some(frame) => frame,
            None => return Ok(TickOutcome::NotReady),
        };

        let detections = self.detector.detect(&frame)?;
        let count = detections.len();
        debug!("[{}] {} detections on frame {}", self.kind, count, frame.sequence);
        self.state
            .set_result(self.kind, DetectionResult::from_detections(&detections));

        if self.kind == DetectorKind::Face && self.state.modes.get(ModeFlag::FaceTracking) {
            if let (Some(actuator), Some(primary)) = (&self.actuator, detections.first()) {
                let centroid = primary.centroid();
                if let Err(e) = actuator.track_at(centroid, frame.dims.width, frame.dims.height, now_ms) {
                    warn!("[{}] tracking toward {:?} failed: {}", self.kind, centroid, e);
                }
            }
        }

        if let Some(transition) = self.debouncer.push(count) {
            self.record_transition(transition, &detections);
        }

        if self.kind == DetectorKind::Danger {
            self.check_fire(&detections, now_ms);
        }

        Ok(TickOutcome::Detected(count))
    }

    fn record_transition(&self, transition: Transition, detections: &[Detection]) {
        info!(
            "[{}] confirmed count {} -> {}",
            self.kind, transition.from, transition.to
        );
        let confidence = detections
            .iter()
            .map(|d| d.confidence as f64)
            .reduce(f64::max);

        let (event_type, detail) = match self.kind {
            DetectorKind::Face => transition.face_event(),
            DetectorKind::Danger if transition.to == 0 => {
                (EventType::DangerCleared, json!({ "count": 0 }))
            }
            DetectorKind::Danger => {
                let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
                (
                    EventType::DangerousObject,
                    json!({
                        "count": transition.to,
                        "labels": labels,
                        "change": transition.change(),
                    }),
                )
            }
        };

        if let Err(e) = self.events.append(event_type, Some(detail), confidence) {
            warn!("[{}] failed to record {}: {}", self.kind, event_type, e);
        }
    }

    fn check_fire(&mut self, detections: &[Detection], now_ms: u64) {
        let fire = detections
            .iter()
            .filter(|d| d.label == FIRE_LABEL && d.confidence > self.fire_confidence)
            .map(|d| d.confidence)
            .reduce(f32::max);
        let Some(confidence) = fire else {
            return;
        };

        let cooled_down = self
            .last_alarm_ms
            .map_or(true, |last| now_ms.saturating_sub(last) > self.fire_cooldown_ms);
        if !cooled_down {
            return;
        }
        self.last_alarm_ms = Some(now_ms);

        warn!("[{}] fire detected (confidence {:.2})", self.kind, confidence);
        if let Err(e) = self.events.append(
            EventType::FireAlarm,
            Some(json!({ "confidence": confidence })),
            Some(confidence as f64),
        ) {
            warn!("[{}] failed to record fire alarm: {}", self.kind, e);
        }
        if let Some(speaker) = &self.speaker {
            speaker.play(Cue::Alarm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorDriver, ActuatorError, LoggingActuator};
    use crate::config::{ActuatorConfig, ModesConfig};
    use crate::frame::{Frame, FrameDims};
    use anyhow::anyhow;
    use shared::events::EventQuery;
    use shared::ipc::Axis;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script; `None` entries fail.
    struct ScriptedDetector {
        script: VecDeque<Option<Vec<Detection>>>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            match self.script.pop_front() {
                Some(Some(d)) => Ok(d),
                Some(None) => Err(anyhow!("model crashed")),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Default)]
    struct CueRecorder(Mutex<Vec<Cue>>);

    impl Speaker for CueRecorder {
        fn play(&self, cue: Cue) {
            self.0.lock().unwrap().push(cue);
        }

        fn say(&self, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn boxes(n: usize, label: &str, confidence: f32) -> Vec<Detection> {
        (0..n)
            .map(|i| Detection {
                bbox: [i as f32, 0.0, i as f32 + 10.0, 10.0],
                label: label.to_string(),
                confidence,
            })
            .collect()
    }

    fn ready_broker() -> Arc<FrameBroker> {
        let broker = FrameBroker::with_dims(FrameDims::new(480, 640, 3)).unwrap();
        broker.publish(&vec![0u8; 480 * 640 * 3]).unwrap();
        Arc::new(broker)
    }

    fn all_modes() -> ModesConfig {
        ModesConfig {
            face_detection: true,
            face_tracking: false,
            danger_detection: true,
            face_overlay: true,
            voice_wake: true,
        }
    }

    fn every_tick() -> DetectionConfig {
        let mut config = DetectionConfig::default();
        config.face.cadence = 1;
        config.danger.cadence = 1;
        config
    }

    fn worker(
        kind: DetectorKind,
        script: Vec<Option<Vec<Detection>>>,
        state: Arc<SharedState>,
    ) -> DetectionWorker {
        DetectionWorker::new(
            kind,
            Box::new(ScriptedDetector {
                script: script.into(),
            }),
            ready_broker(),
            state,
            EventLog::open_in_memory().unwrap(),
            &every_tick(),
        )
    }

    fn all_events(worker: &DetectionWorker) -> Vec<String> {
        let start = chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2100, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        worker
            .events
            .query(&EventQuery::range(start, end))
            .unwrap()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    #[test]
    fn test_failed_detection_keeps_previous_result() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let mut script: Vec<Option<Vec<Detection>>> =
            (0..49).map(|i| Some(boxes(i % 3, "face", 0.9))).collect();
        script.push(None);
        script.push(Some(boxes(2, "face", 0.9)));
        let mut w = worker(DetectorKind::Face, script, Arc::clone(&state));

        for _ in 0..49 {
            w.tick().unwrap();
        }
        let after_49 = state.result(DetectorKind::Face);

        assert!(w.tick().is_err());
        assert_eq!(state.result(DetectorKind::Face), after_49);

        assert_eq!(w.tick().unwrap(), TickOutcome::Detected(2));
        assert_eq!(state.result(DetectorKind::Face).len(), 2);
    }

    #[test]
    fn test_scene_enter_logged_once() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let script = [0, 0, 0, 0, 0, 1, 1, 1, 1, 1]
            .iter()
            .map(|&n| Some(boxes(n, "face", 0.9)))
            .collect();
        let mut w = worker(DetectorKind::Face, script, state);
        for _ in 0..10 {
            w.tick().unwrap();
        }
        assert_eq!(all_events(&w), vec!["scene_enter"]);
    }

    #[test]
    fn test_disabled_worker_does_not_detect() {
        let state = Arc::new(SharedState::new(&ModesConfig::default(), &Default::default()));
        let mut w = worker(DetectorKind::Danger, vec![Some(boxes(1, "knife", 0.9))], state);
        assert_eq!(w.tick().unwrap(), TickOutcome::Disabled);
    }

    #[test]
    fn test_cadence_skips_ticks() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let mut config = DetectionConfig::default();
        config.face.cadence = 3;
        let mut w = DetectionWorker::new(
            DetectorKind::Face,
            Box::new(ScriptedDetector {
                script: VecDeque::new(),
            }),
            ready_broker(),
            state,
            EventLog::open_in_memory().unwrap(),
            &config,
        );
        let outcomes: Vec<TickOutcome> = (0..6).map(|_| w.tick().unwrap()).collect();
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Waiting,
                TickOutcome::Waiting,
                TickOutcome::Detected(0),
                TickOutcome::Waiting,
                TickOutcome::Waiting,
                TickOutcome::Detected(0),
            ]
        );
    }

    #[test]
    fn test_empty_broker_is_not_ready() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let mut w = DetectionWorker::new(
            DetectorKind::Face,
            Box::new(ScriptedDetector {
                script: VecDeque::new(),
            }),
            Arc::new(FrameBroker::new()),
            state,
            EventLog::open_in_memory().unwrap(),
            &every_tick(),
        );
        assert_eq!(w.tick().unwrap(), TickOutcome::NotReady);
    }

    #[test]
    fn test_tracking_moves_toward_face() {
        let modes = ModesConfig {
            face_tracking: true,
            ..all_modes()
        };
        let state = Arc::new(SharedState::new(&modes, &Default::default()));
        let actuator = ActuatorController::new(
            Arc::clone(&state),
            Box::new(LoggingActuator::default()),
            ActuatorConfig::default(),
        );
        // face far right of a 640 wide frame
        let face = Detection {
            bbox: [600.0, 230.0, 620.0, 250.0],
            label: "face".to_string(),
            confidence: 0.9,
        };
        let mut w = worker(DetectorKind::Face, vec![Some(vec![face])], Arc::clone(&state))
            .with_actuator(actuator.clone());

        w.tick().unwrap();
        assert_eq!(actuator.angle(Axis::Horizontal), 20);
        assert_eq!(actuator.angle(Axis::Vertical), 0);
    }

    #[test]
    fn test_danger_events_and_fire_alarm_cooldown() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let mut script: Vec<Option<Vec<Detection>>> =
            (0..5).map(|_| Some(boxes(1, "fire", 0.95))).collect();
        script.extend((0..5).map(|_| Some(Vec::new())));
        let speaker = Arc::new(CueRecorder::default());
        let mut w = worker(DetectorKind::Danger, script, state)
            .with_speaker(Arc::clone(&speaker) as Arc<dyn Speaker>);

        for i in 0..10u64 {
            w.tick_at(1_000_000 + i * 250).unwrap();
        }

        assert_eq!(
            all_events(&w),
            vec!["fire_alarm", "dangerous_object", "danger_cleared"]
        );
        assert_eq!(*speaker.0.lock().unwrap(), vec![Cue::Alarm]);
    }

    #[test]
    fn test_low_confidence_fire_does_not_alarm() {
        let state = Arc::new(SharedState::new(&all_modes(), &Default::default()));
        let speaker = Arc::new(CueRecorder::default());
        let mut w = worker(
            DetectorKind::Danger,
            vec![Some(boxes(1, "fire", 0.5)), Some(boxes(1, "knife", 0.99))],
            state,
        )
        .with_speaker(Arc::clone(&speaker) as Arc<dyn Speaker>);

        w.tick().unwrap();
        w.tick().unwrap();
        assert!(speaker.0.lock().unwrap().is_empty());
    }

    struct BrokenDriver;

    impl ActuatorDriver for BrokenDriver {
        fn rotate(&mut self, _axis: Axis, _degrees: i32) -> Result<(), ActuatorError> {
            Err(ActuatorError::UnknownDriver("disconnected".into()))
        }

        fn sleep(&mut self) -> Result<(), ActuatorError> {
            Err(ActuatorError::UnknownDriver("disconnected".into()))
        }
    }

    #[test]
    fn test_broken_actuator_does_not_block_face_events() {
        let modes = ModesConfig {
            face_tracking: true,
            ..all_modes()
        };
        let state = Arc::new(SharedState::new(&modes, &Default::default()));
        let actuator = ActuatorController::new(
            Arc::clone(&state),
            Box::new(BrokenDriver),
            ActuatorConfig::default(),
        );
        let script = (0..10).map(|_| Some(boxes(1, "face", 0.9))).collect();
        let mut w = worker(DetectorKind::Face, script, Arc::clone(&state)).with_actuator(actuator.clone());

        assert!(actuator.jog_at(Axis::Horizontal, 1, 0).is_err());
        // ticks further apart than the idle timeout, so each one also tries to sleep
        for i in 0..10u64 {
            assert_eq!(w.tick_at(100_000 + i * 40_000).unwrap(), TickOutcome::Detected(1));
        }
        assert_eq!(all_events(&w), vec!["scene_enter"]);
        assert_eq!(state.result(DetectorKind::Face).len(), 1);
        assert_eq!(actuator.angle(Axis::Horizontal), 0);
        assert!(!state.actuator.snapshot().sleeping);
    }
}
