mod common;

use anyhow::Result;
use sentryd::audio::{Cue, Speaker};
use sentryd::config::{DetectionConfig, ModesConfig};
use sentryd::detection::{DetectionWorker, Detector, TickOutcome};
use sentryd::events::EventLog;
use sentryd::frame::Frame;
use shared::events::{EventCategory, EventFilter, EventQuery, EventType};
use shared::ipc::{DetectorKind, Detection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Returns `counts` boxes per call, then nothing.
struct CountingDetector {
    counts: VecDeque<usize>,
    label: &'static str,
    confidence: f32,
}

impl CountingDetector {
    fn new(counts: &[usize], label: &'static str, confidence: f32) -> Self {
        Self {
            counts: counts.iter().copied().collect(),
            label,
            confidence,
        }
    }
}

impl Detector for CountingDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let n = self.counts.pop_front().unwrap_or(0);
        Ok((0..n)
            .map(|i| Detection {
                bbox: [i as f32, 4.0, i as f32 + 10.0, 20.0],
                label: self.label.to_string(),
                confidence: self.confidence,
            })
            .collect())
    }
}

#[derive(Default)]
struct Cues(Mutex<Vec<Cue>>);

impl Speaker for Cues {
    fn play(&self, cue: Cue) {
        self.0.lock().unwrap().push(cue);
    }

    fn say(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

fn detection_config(window: usize) -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.debounce_window = window;
    config.face.cadence = 1;
    config.danger.cadence = 1;
    config
}

fn everything() -> EventQuery {
    let (start, end) = common::all_time();
    EventQuery::range(start, end)
}

#[test]
fn test_events_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("events.db");

    {
        let log = EventLog::open(&path).unwrap();
        tokio_test::assert_ok!(log.append_at(
            common::at(3, 8, 0, 0),
            EventType::PersonEnter,
            Some(serde_json::json!({ "count": 2, "change": 1 })),
            None,
        ));
    }

    let reopened = EventLog::open(&path).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
    let latest = reopened.latest().unwrap().unwrap();
    assert_eq!(latest.event_type, "person_enter");
    assert_eq!(latest.timestamp, common::at(3, 8, 0, 0));
    assert_eq!(latest.detail.unwrap()["change"], 1);
}

#[test]
fn test_face_worker_transitions_reach_a_second_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let state = common::state_with(ModesConfig {
        face_detection: true,
        ..ModesConfig::default()
    });

    let script = [1, 1, 1, 2, 2, 2, 2, 0, 0, 0];
    let mut worker = DetectionWorker::new(
        DetectorKind::Face,
        Box::new(CountingDetector::new(&script, "face", 0.9)),
        common::ready_broker(7),
        Arc::clone(&state),
        EventLog::open(&path).unwrap(),
        &detection_config(3),
    );

    for (i, expected) in script.iter().enumerate() {
        let outcome = worker.tick_at(i as u64 * 100).unwrap();
        assert_eq!(outcome, TickOutcome::Detected(*expected));
    }
    assert!(state.result(DetectorKind::Face).is_empty());

    let reader = EventLog::open(&path).unwrap();
    let records = reader.query(&everything()).unwrap();
    let types: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(types, vec!["scene_enter", "person_enter", "scene_leave"]);
    assert_eq!(records[1].detail.as_ref().unwrap()["change"], 1);

    let human = everything().with_filter(EventFilter::Category(EventCategory::HumanActivity));
    assert_eq!(reader.query(&human).unwrap().len(), 3);
}

#[test]
fn test_flicker_shorter_than_window_is_not_logged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let state = common::state_with(ModesConfig {
        face_tracking: true,
        ..ModesConfig::default()
    });

    let script = [1, 1, 0, 1, 1, 0, 1];
    let mut worker = DetectionWorker::new(
        DetectorKind::Face,
        Box::new(CountingDetector::new(&script, "face", 0.9)),
        common::ready_broker(7),
        Arc::clone(&state),
        EventLog::open(&path).unwrap(),
        &detection_config(3),
    );
    for i in 0..script.len() {
        worker.tick_at(i as u64 * 100).unwrap();
    }

    assert_eq!(EventLog::open(&path).unwrap().count().unwrap(), 0);
    assert_eq!(state.result(DetectorKind::Face).len(), 1);
}

#[test]
fn test_danger_worker_logs_objects_and_fire() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let state = common::state_with(ModesConfig {
        danger_detection: true,
        ..ModesConfig::default()
    });
    let cues = Arc::new(Cues::default());

    let mut worker = DetectionWorker::new(
        DetectorKind::Danger,
        Box::new(CountingDetector::new(&[1, 1], "fire", 0.95)),
        common::ready_broker(7),
        Arc::clone(&state),
        EventLog::open(&path).unwrap(),
        &detection_config(2),
    )
    .with_speaker(cues.clone());

    worker.tick_at(0).unwrap();
    worker.tick_at(100).unwrap();

    let reader = EventLog::open(&path).unwrap();
    let danger = everything().with_filter(EventFilter::Category(EventCategory::Danger));
    let types: Vec<String> = reader
        .query(&danger)
        .unwrap()
        .into_iter()
        .map(|r| r.event_type)
        .collect();
    // one alarm: the second sighting is inside the cooldown
    assert_eq!(types.iter().filter(|t| *t == "fire_alarm").count(), 1);
    assert_eq!(types.iter().filter(|t| *t == "dangerous_object").count(), 1);
    assert_eq!(*cues.0.lock().unwrap(), vec![Cue::Alarm]);
}
