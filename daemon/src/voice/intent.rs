//! Structured commands extracted from free-form model replies.
//!
//! Model output is untrusted text: it may be wrapped in code fences, padded
//! with prose, or use strings where numbers were asked for. Everything here
//! returns a `Result` so callers must handle the fallback explicitly.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use shared::events::{EventCategory, EventFilter, EventQuery, EventRecord};
use shared::ipc::ModeFlag;
use thiserror::Error;

/// Time layout used in prompts and accepted in replies.
pub const PROMPT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_TIME_FORMATS: [&str; 4] = [
    PROMPT_TIME_FORMAT,
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Rotation requests are bounded to this many steps per axis.
pub const MAX_ROTATE_STEPS: i32 = 5;

#[derive(Error, Debug)]
pub enum IntentError {
    #[error("no JSON object found in reply")]
    NoJson,

    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reply does not match the command schema: {0}")]
    Schema(String),
}

/// The raw reply fields, read leniently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceIntent {
    pub cmd_type: i64,
    pub cmd_content: Option<i64>,
    pub rotate: Option<(f64, f64)>,
    pub switch: Option<bool>,
    pub mode: Option<i64>,
    pub search_time: Option<(String, String)>,
    pub search_type: Option<i64>,
    pub search_extra: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Mute,
    Sentry,
    Privacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Relative move in actuator steps, already bounded.
    Rotate { h: i32, v: i32 },
    SwitchMode(Mode),
    SetFlag { flag: ModeFlag, enabled: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub category: Option<EventCategory>,
    pub terms: Vec<String>,
}

impl QueryRequest {
    pub fn to_event_query(&self) -> EventQuery {
        let query = EventQuery::range(self.start, self.end).with_terms(self.terms.clone());
        match self.category {
            Some(category) => query.with_filter(EventFilter::Category(category)),
            None => query,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Control(ControlAction),
    Query(QueryRequest),
    Unrecognized,
}

/// Pulls the first JSON object out of a model reply.
///
/// Tries, in order: the reply with code fences stripped, then every `{`
/// position as the start of a streamed value.
pub fn extract_json(reply: &str) -> Result<Value, IntentError> {
    let stripped = strip_fences(reply);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }

    let mut last_error = None;
    for (start, _) in reply.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&reply[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => return Ok(value),
            Some(Err(e)) => last_error = Some(e),
            _ => {}
        }
    }
    Err(last_error.map_or(IntentError::NoJson, IntentError::Malformed))
}

fn strip_fences(reply: &str) -> &str {
    let mut s = reply.trim();
    for prefix in ["```json", "```JSON", "```"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            break;
        }
    }
    s.strip_suffix("```").unwrap_or(s).trim()
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Some(true),
            "false" | "off" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl VoiceIntent {
    pub fn from_value(value: &Value) -> Result<Self, IntentError> {
        let obj = value
            .as_object()
            .ok_or_else(|| IntentError::Schema("reply is not an object".to_string()))?;
        let detail = obj.get("cmd_detail").and_then(Value::as_object);

        let rotate = detail
            .and_then(|d| d.get("rotate"))
            .and_then(Value::as_array)
            .and_then(|a| match a.as_slice() {
                [h, v, ..] => Some((as_float(h)?, as_float(v)?)),
                _ => None,
            });

        let search_time = obj
            .get("search_time")
            .and_then(Value::as_array)
            .and_then(|a| match a.as_slice() {
                [Value::String(s), Value::String(e), ..] => Some((s.clone(), e.clone())),
                _ => None,
            });

        let search_extra = obj
            .get("search_extra")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            cmd_type: obj.get("cmd_type").and_then(as_int).unwrap_or(0),
            cmd_content: obj.get("cmd_content").and_then(as_int),
            rotate,
            switch: detail.and_then(|d| d.get("switch")).and_then(as_bool),
            mode: detail.and_then(|d| d.get("mode")).and_then(as_int),
            search_time,
            search_type: obj.get("search_type").and_then(as_int),
            search_extra,
        })
    }

    /// Maps the integer codes onto a typed intent. Control codes missing
    /// their detail field are unrecognized; a query without a usable time
    /// range is a schema error.
    pub fn classify(&self) -> Result<Intent, IntentError> {
        match self.cmd_type {
            1 => Ok(self.control().map_or(Intent::Unrecognized, Intent::Control)),
            2 => self.query().map(Intent::Query),
            _ => Ok(Intent::Unrecognized),
        }
    }

    fn control(&self) -> Option<ControlAction> {
        let set_flag = |flag| {
            self.switch
                .map(|enabled| ControlAction::SetFlag { flag, enabled })
        };
        match self.cmd_content? {
            0 => {
                let (h, v) = self.rotate?;
                let bound = |steps: f64| {
                    (steps.round() as i64).clamp(-MAX_ROTATE_STEPS as i64, MAX_ROTATE_STEPS as i64)
                        as i32
                };
                Some(ControlAction::Rotate {
                    h: bound(h),
                    v: bound(v),
                })
            }
            1 => {
                let mode = match self.mode? {
                    0 => Mode::Normal,
                    1 => Mode::Mute,
                    2 => Mode::Sentry,
                    3 => Mode::Privacy,
                    _ => return None,
                };
                Some(ControlAction::SwitchMode(mode))
            }
            2 => set_flag(ModeFlag::FaceTracking),
            3 => set_flag(ModeFlag::VoiceWake),
            4 => set_flag(ModeFlag::DangerDetection),
            // 5 is sound-event detection, which this device does not run
            _ => None,
        }
    }

    fn query(&self) -> Result<QueryRequest, IntentError> {
        let (start, end) = self
            .search_time
            .as_ref()
            .ok_or_else(|| IntentError::Schema("query without search_time".to_string()))?;
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if start > end {
            return Err(IntentError::Schema(format!(
                "search_time starts after it ends: {} > {}",
                start, end
            )));
        }
        Ok(QueryRequest {
            start,
            end,
            category: self.search_type.and_then(EventCategory::from_code),
            terms: self.search_extra.clone(),
        })
    }
}

/// Accepts the prompt layout, ISO 8601 and bare dates (midnight).
pub fn parse_time(text: &str) -> Result<NaiveDateTime, IntentError> {
    let text = text.trim();
    for format in ACCEPTED_TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(t);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| IntentError::Schema(format!("unreadable time: {:?}", text)))
}

/// Full lenient path from reply text to a typed intent.
pub fn parse_reply(reply: &str) -> Result<Intent, IntentError> {
    let value = extract_json(reply)?;
    VoiceIntent::from_value(&value)?.classify()
}

/// System prompt for turning a transcript into the command schema.
pub fn command_prompt(now: NaiveDateTime) -> String {
    format!(
        r#"You are the voice assistant of a home security camera. Answer every
user instruction with exactly one JSON object in this format:
{{
  "cmd_type": 0/1/2,        // 0 invalid, 1 control, 2 search
  "cmd_content": 0-5,       // control only: 0 rotate, 1 switch mode, 2 face tracking, 3 voice wake, 4 danger detection, 5 danger sound detection
  "cmd_detail": {{
    "rotate": [h_steps, v_steps], // rotate only, each in [-5, 5], scaled to how strongly the user asks
    "switch": true/false,         // on/off commands
    "mode": 0/1/2/3               // 0 normal, 1 mute, 2 sentry, 3 privacy
  }},
  "search_time": ["start", "end"], // search only, formatted like "2024-05-01 00:00:00"
  "search_type": 0/1/2,            // 0 danger sounds, 1 human activity, 2 dangerous objects
  "search_extra": []               // optional class names to narrow a search
}}
Notes:
- The current time is {now}.
- Dangerous object classes: fire, gun, knife.
- Human activity classes: scene_enter, scene_leave, person_enter, person_leave.
- Only use the class names above in search_extra.
- Reply with the JSON only, no explanation.
- Infer implied meaning; a question about the past is probably a search.
- If the instruction cannot be understood, set cmd_type to 0.
- A search must always carry a time range."#,
        now = now.format(PROMPT_TIME_FORMAT)
    )
}

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a security expert. Summarize in concise natural language only. Never answer with JSON or lists.";

/// User prompt asking for a spoken summary of `records`.
pub fn summary_prompt(request: &QueryRequest, records: &[EventRecord]) -> String {
    let mut rows = String::new();
    for r in records {
        let detail = r.detail.as_ref().map(Value::to_string).unwrap_or_default();
        let confidence = r.confidence.map(|c| format!("{:.2}", c)).unwrap_or_default();
        rows.push_str(&format!(
            "{} {} {} {}\n",
            r.timestamp.format(PROMPT_TIME_FORMAT),
            r.event_type,
            detail,
            confidence
        ));
    }
    format!(
        "Briefly summarize the security events between {} and {} below. If it helps, \
         point out which periods of footage deserve a closer look.\n{}\
         That is the complete list; if it is empty, nothing happened.",
        request.start.format(PROMPT_TIME_FORMAT),
        request.end.format(PROMPT_TIME_FORMAT),
        rows
    )
}
