//! Pan/tilt control: dead-zone proportional stepping, range clamping and
//! idle sleep.

pub mod driver;

pub use driver::{ActuatorDriver, ActuatorError, GpioStepper, LoggingActuator};

use shared::ipc::Axis;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::ActuatorConfig;
use crate::state::{now_millis, SharedState};

/// Signed angle change for one axis, or 0 inside the dead zone.
///
/// The step count grows with the offset in eighths of the frame and is
/// clamped to `1..=max_steps` before being scaled by `unit`.
pub fn step_size(delta: i32, frame_dim: u32, dead_zone: u32, unit: i32, max_steps: i32) -> i32 {
    if delta.unsigned_abs() <= dead_zone / 2 {
        return 0;
    }
    let eighth = (frame_dim / 8).max(1) as f32;
    let steps = (delta.unsigned_abs() as f32 / eighth)
        .round()
        .clamp(1.0, max_steps.max(1) as f32) as i32;
    steps * unit * delta.signum()
}

/// Outcome of a single axis move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisMove {
    pub axis: Axis,
    pub requested: i32,
    pub applied: i32,
    pub angle: i32,
}

impl AxisMove {
    pub fn clamped(&self) -> bool {
        self.applied != self.requested
    }
}

#[derive(Clone)]
pub struct ActuatorController {
    state: Arc<SharedState>,
    driver: Arc<Mutex<Box<dyn ActuatorDriver>>>,
    config: ActuatorConfig,
}

impl ActuatorController {
    pub fn new(
        state: Arc<SharedState>,
        driver: Box<dyn ActuatorDriver>,
        config: ActuatorConfig,
    ) -> Self {
        Self {
            state,
            driver: Arc::new(Mutex::new(driver)),
            config,
        }
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    fn driver(&self) -> MutexGuard<'_, Box<dyn ActuatorDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bounds(&self, axis: Axis) -> (i32, i32) {
        match axis {
            Axis::Horizontal => (self.config.h_min, self.config.h_max),
            Axis::Vertical => (self.config.v_min, self.config.v_max),
        }
    }

    fn angle_slot(&self, axis: Axis) -> &std::sync::atomic::AtomicI32 {
        match axis {
            Axis::Horizontal => &self.state.actuator.h_angle,
            Axis::Vertical => &self.state.actuator.v_angle,
        }
    }

    pub fn angle(&self, axis: Axis) -> i32 {
        self.angle_slot(axis).load(Ordering::Relaxed)
    }

    fn mark_activity(&self, now_ms: u64) {
        self.state
            .actuator
            .last_activity_ms
            .store(now_ms, Ordering::Relaxed);
        if self.state.actuator.sleeping.swap(false, Ordering::Relaxed) {
            info!("[actuator] waking from idle sleep");
        }
    }

    /// Applies `delta` degrees to `axis`, clamped to the axis range. The
    /// driver lock is held across the read-modify-write so concurrent callers
    /// serialize.
    fn move_axis(&self, axis: Axis, delta: i32) -> Result<AxisMove, ActuatorError> {
        let (min, max) = self.bounds(axis);
        let mut driver = self.driver();
        let current = self.angle(axis);
        let target = current.saturating_add(delta).clamp(min, max);
        let applied = target - current;

        if applied != 0 {
            driver.rotate(axis, applied)?;
            self.angle_slot(axis).store(target, Ordering::Relaxed);
        }
        if applied != delta {
            debug!(
                "[actuator] {:?} clamped: requested {}°, applied {}° (limit {}..{})",
                axis, delta, applied, min, max
            );
        }

        Ok(AxisMove {
            axis,
            requested: delta,
            applied,
            angle: target,
        })
    }

    /// Steers toward `target` (pixel coordinates) on a `width`x`height` frame.
    pub fn track(&self, target: (i32, i32), width: u32, height: u32) -> Result<Vec<AxisMove>, ActuatorError> {
        self.track_at(target, width, height, now_millis())
    }

    pub fn track_at(
        &self,
        target: (i32, i32),
        width: u32,
        height: u32,
        now_ms: u64,
    ) -> Result<Vec<AxisMove>, ActuatorError> {
        self.mark_activity(now_ms);

        let center = ((width / 2) as i32, (height / 2) as i32);
        let c = &self.config;
        let offset = (
            target.0.saturating_sub(center.0),
            target.1.saturating_sub(center.1),
        );
        let dh = step_size(offset.0, width, c.dead_zone, c.step_unit, c.max_steps) * c.h_sign.signum();
        let dv = step_size(offset.1, height, c.dead_zone, c.step_unit, c.max_steps) * c.v_sign.signum();

        let mut moves = Vec::new();
        if dh != 0 {
            moves.push(self.move_axis(Axis::Horizontal, dh)?);
        }
        if dv != 0 {
            moves.push(self.move_axis(Axis::Vertical, dv)?);
        }
        Ok(moves)
    }

    /// Manual jog of `steps` units, bounded by `max_steps` in either direction.
    pub fn jog(&self, axis: Axis, steps: i32) -> Result<AxisMove, ActuatorError> {
        self.jog_at(axis, steps, now_millis())
    }

    pub fn jog_at(&self, axis: Axis, steps: i32, now_ms: u64) -> Result<AxisMove, ActuatorError> {
        self.mark_activity(now_ms);
        let steps = steps.clamp(-self.config.max_steps, self.config.max_steps);
        let result = self.move_axis(axis, steps * self.config.step_unit)?;
        info!(
            "[actuator] jog {:?} {} steps -> {}°{}",
            axis,
            steps,
            result.angle,
            if result.clamped() { " (at limit)" } else { "" }
        );
        Ok(result)
    }

    /// Moves both axes to the configured park position.
    pub fn park(&self) -> Result<(), ActuatorError> {
        self.mark_activity(now_millis());
        let h = self.config.park_h - self.angle(Axis::Horizontal);
        let v = self.config.park_v - self.angle(Axis::Vertical);
        self.move_axis(Axis::Horizontal, h)?;
        self.move_axis(Axis::Vertical, v)?;
        info!(
            "[actuator] parked at ({}, {})",
            self.angle(Axis::Horizontal),
            self.angle(Axis::Vertical)
        );
        Ok(())
    }

    /// Puts the drivers to sleep once the idle timeout has elapsed. Returns
    /// true only on the call that actually issued the sleep.
    pub fn check_idle(&self) -> Result<bool, ActuatorError> {
        self.check_idle_at(now_millis())
    }

    /// `sleeping` is only set once the driver accepted the sleep, so a
    /// failed attempt is retried on the next check.
    pub fn check_idle_at(&self, now_ms: u64) -> Result<bool, ActuatorError> {
        let mut driver = self.driver();
        let last = self.state.actuator.last_activity_ms.load(Ordering::Relaxed);
        let idle_ms = now_ms.saturating_sub(last);
        if idle_ms <= self.config.idle_timeout_secs * 1000
            || self.state.actuator.sleeping.load(Ordering::Acquire)
        {
            return Ok(false);
        }

        info!("[actuator] idle for {} ms, sleeping", idle_ms);
        if let Err(e) = driver.sleep() {
            warn!("[actuator] sleep failed: {}", e);
            return Err(e);
        }
        self.state.actuator.sleeping.store(true, Ordering::Release);
        Ok(true)
    }
}
