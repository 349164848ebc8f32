use serde_json::json;
use shared::events::EventType;
use std::collections::VecDeque;

/// A confirmed change of the detection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: usize,
    pub to: usize,
}

impl Transition {
    pub fn change(&self) -> i64 {
        self.to as i64 - self.from as i64
    }

    /// Face transitions: 0→N enters the scene, N→0 leaves it, anything else
    /// is a person joining or leaving.
    pub fn face_event(&self) -> (EventType, serde_json::Value) {
        match (self.from, self.to) {
            (0, to) => (EventType::SceneEnter, json!({ "count": to })),
            (_, 0) => (EventType::SceneLeave, json!({ "count": 0 })),
            (_, to) if self.change() > 0 => (
                EventType::PersonEnter,
                json!({ "count": to, "change": self.change() }),
            ),
            (_, to) => (
                EventType::PersonLeave,
                json!({ "count": to, "change": self.change() }),
            ),
        }
    }
}

/// Sliding window over raw counts. A change is confirmed only once every slot
/// holds the same value and that value differs from the last confirmed one.
#[derive(Debug)]
pub struct Debouncer {
    window: VecDeque<usize>,
    size: usize,
    confirmed: usize,
}

impl Debouncer {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
            confirmed: 0,
        }
    }

    pub fn confirmed(&self) -> usize {
        self.confirmed
    }

    pub fn push(&mut self, count: usize) -> Option<Transition> {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(count);

        if self.window.len() < self.size || self.window.iter().any(|&c| c != count) {
            return None;
        }
        if count == self.confirmed {
            return None;
        }

        let transition = Transition {
            from: self.confirmed,
            to: count,
        };
        self.confirmed = count;
        Some(transition)
    }
}
