// Common test helpers for sentryd integration tests
//
// This module provides utilities for:
// - User interaction and confirmation (hardware tests)
// - Building a daemon core without hardware
// - Test output formatting
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use sentryd::actuator::{ActuatorController, LoggingActuator};
use sentryd::config::{ActuatorConfig, ModesConfig};
use sentryd::events::EventLog;
use sentryd::frame::{FrameBroker, FrameDims};
use sentryd::rate_limit::ControlRateLimiter;
use sentryd::server::ControlContext;
use sentryd::state::SharedState;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

pub fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

/// Covers any timestamp a test can produce with the real clock.
pub fn all_time() -> (NaiveDateTime, NaiveDateTime) {
    (
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        NaiveDate::from_ymd_opt(2100, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
    )
}

pub fn state_with(modes: ModesConfig) -> Arc<SharedState> {
    Arc::new(SharedState::new(&modes, &Default::default()))
}

pub fn logging_actuator(state: &Arc<SharedState>) -> ActuatorController {
    ActuatorController::new(
        Arc::clone(state),
        Box::new(LoggingActuator::default()),
        ActuatorConfig::default(),
    )
}

/// A broker that already holds one uniformly filled frame.
pub fn ready_broker(fill: u8) -> Arc<FrameBroker> {
    let broker = FrameBroker::with_dims(FrameDims::new(HEIGHT, WIDTH, 3)).unwrap();
    broker
        .publish(&vec![fill; (WIDTH * HEIGHT * 3) as usize])
        .unwrap();
    Arc::new(broker)
}

/// Control context over a file-backed event log at `db`.
pub fn control_context(state: Arc<SharedState>, db: &Path) -> Arc<ControlContext> {
    Arc::new(ControlContext {
        actuator: logging_actuator(&state),
        state,
        broker: ready_broker(0),
        events: Arc::new(Mutex::new(EventLog::open(db).unwrap())),
        limiter: ControlRateLimiter::new(10, 20, true),
    })
}
