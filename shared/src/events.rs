//! Security event records as stored by the daemon and returned to clients.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used for stored events (local wall clock, ISO 8601).
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SceneEnter,
    SceneLeave,
    PersonEnter,
    PersonLeave,
    DangerousObject,
    DangerCleared,
    FireAlarm,
    VoiceCommand,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::SceneEnter,
        EventType::SceneLeave,
        EventType::PersonEnter,
        EventType::PersonLeave,
        EventType::DangerousObject,
        EventType::DangerCleared,
        EventType::FireAlarm,
        EventType::VoiceCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SceneEnter => "scene_enter",
            EventType::SceneLeave => "scene_leave",
            EventType::PersonEnter => "person_enter",
            EventType::PersonLeave => "person_leave",
            EventType::DangerousObject => "dangerous_object",
            EventType::DangerCleared => "danger_cleared",
            EventType::FireAlarm => "fire_alarm",
            EventType::VoiceCommand => "voice_command",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// Coarse grouping used by voice queries ("what happened with people today?").
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Sound,
    HumanActivity,
    Danger,
}

impl EventCategory {
    /// SQL `LIKE` patterns matched against the stored event type.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            EventCategory::Sound => &["%sound%"],
            EventCategory::HumanActivity => &["scene%", "person%"],
            EventCategory::Danger => &["%danger%", "fire%"],
        }
    }

    /// Maps the intent schema's `search_type` code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EventCategory::Sound),
            1 => Some(EventCategory::HumanActivity),
            2 => Some(EventCategory::Danger),
            _ => None,
        }
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sound" => Ok(EventCategory::Sound),
            "human" | "human_activity" => Ok(EventCategory::HumanActivity),
            "danger" => Ok(EventCategory::Danger),
            other => Err(format!("unknown event category: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Type(EventType),
    Category(EventCategory),
}

/// Inclusive time-range query with optional type filter and detail terms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub filter: Option<EventFilter>,
    /// When non-empty, only records whose detail contains any term match.
    #[serde(default)]
    pub terms: Vec<String>,
}

impl EventQuery {
    pub fn range(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            filter: None,
            terms: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_terms(mut self, terms: Vec<String>) -> Self {
        self.terms = terms;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub event_type: String,
    pub detail: Option<serde_json::Value>,
    pub confidence: Option<f64>,
}
