use shared::ipc::Axis;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ActuatorConfig;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("GPIO {pin} write failed: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown actuator driver: {0}")]
    UnknownDriver(String),
}

/// Physical transport for the pan/tilt head.
pub trait ActuatorDriver: Send {
    /// Moves `axis` by a signed angle in degrees.
    fn rotate(&mut self, axis: Axis, degrees: i32) -> Result<(), ActuatorError>;

    /// Drops into the low-power hold state.
    fn sleep(&mut self) -> Result<(), ActuatorError>;
}

pub fn from_config(config: &ActuatorConfig) -> Result<Box<dyn ActuatorDriver>, ActuatorError> {
    match config.driver.as_str() {
        "log" => Ok(Box::new(LoggingActuator::default())),
        "gpio" => Ok(Box::new(GpioStepper::new(config)?)),
        other => Err(ActuatorError::UnknownDriver(other.to_string())),
    }
}

/// Records moves without touching hardware.
#[derive(Debug, Default)]
pub struct LoggingActuator {
    pub moves: Vec<(Axis, i32)>,
    pub sleeps: usize,
}

impl ActuatorDriver for LoggingActuator {
    fn rotate(&mut self, axis: Axis, degrees: i32) -> Result<(), ActuatorError> {
        debug!("[actuator] rotate {:?} by {}°", axis, degrees);
        self.moves.push((axis, degrees));
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), ActuatorError> {
        info!("[actuator] sleep");
        self.sleeps += 1;
        Ok(())
    }
}

/// Half-step phase table for a 4-coil unipolar stepper.
const HALF_STEP: [[u8; 4]; 8] = [
    [1, 0, 0, 0],
    [1, 1, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 1, 0],
    [0, 0, 1, 0],
    [0, 0, 1, 1],
    [0, 0, 0, 1],
    [1, 0, 0, 1],
];
const STEPS_PER_REV: u32 = 4096;
const GPIO_ROOT: &str = "/sys/class/gpio";

pub fn steps_for(degrees: i32) -> u32 {
    degrees.unsigned_abs() * STEPS_PER_REV / 360
}

/// Two steppers driven through sysfs GPIO.
pub struct GpioStepper {
    root: PathBuf,
    h_pins: [u32; 4],
    v_pins: [u32; 4],
    step_delay: Duration,
}

impl GpioStepper {
    pub fn new(config: &ActuatorConfig) -> Result<Self, ActuatorError> {
        Self::with_root(GPIO_ROOT, config)
    }

    pub fn with_root(root: impl AsRef<Path>, config: &ActuatorConfig) -> Result<Self, ActuatorError> {
        let stepper = Self {
            root: root.as_ref().to_path_buf(),
            h_pins: config.h_pins,
            v_pins: config.v_pins,
            step_delay: Duration::from_micros(config.step_delay_us),
        };
        for pin in stepper.h_pins.iter().chain(stepper.v_pins.iter()) {
            stepper.export(*pin)?;
        }
        info!(
            "GPIO stepper ready: h pins {:?}, v pins {:?}",
            stepper.h_pins, stepper.v_pins
        );
        Ok(stepper)
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn export(&self, pin: u32) -> Result<(), ActuatorError> {
        let gpio_err = |source| ActuatorError::Gpio { pin, source };
        if !self.pin_dir(pin).exists() {
            fs::write(self.root.join("export"), pin.to_string()).map_err(gpio_err)?;
        }
        fs::write(self.pin_dir(pin).join("direction"), "out").map_err(gpio_err)?;
        self.write(pin, 0)
    }

    fn write(&self, pin: u32, value: u8) -> Result<(), ActuatorError> {
        fs::write(self.pin_dir(pin).join("value"), if value == 0 { "0" } else { "1" })
            .map_err(|source| ActuatorError::Gpio { pin, source })
    }

    fn pins(&self, axis: Axis) -> [u32; 4] {
        match axis {
            Axis::Horizontal => self.h_pins,
            Axis::Vertical => self.v_pins,
        }
    }
}

impl ActuatorDriver for GpioStepper {
    fn rotate(&mut self, axis: Axis, degrees: i32) -> Result<(), ActuatorError> {
        let pins = self.pins(axis);
        let steps = steps_for(degrees);
        debug!("[actuator] {:?} {}° = {} steps", axis, degrees, steps);

        for i in 0..steps as usize {
            let phase = if degrees >= 0 {
                HALF_STEP[i % 8]
            } else {
                HALF_STEP[7 - i % 8]
            };
            for (pin, value) in pins.iter().zip(phase) {
                self.write(*pin, value)?;
            }
            thread::sleep(self.step_delay);
        }
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), ActuatorError> {
        for pin in self.h_pins.iter().chain(self.v_pins.iter()) {
            self.write(*pin, 0)?;
        }
        info!("[actuator] coils released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_gpio_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let config = ActuatorConfig::default();
        for pin in config.h_pins.iter().chain(config.v_pins.iter()) {
            fs::create_dir_all(dir.path().join(format!("gpio{}", pin))).unwrap();
        }
        dir
    }

    fn read_pin(root: &Path, pin: u32) -> String {
        fs::read_to_string(root.join(format!("gpio{}", pin)).join("value")).unwrap()
    }

    #[test]
    fn test_steps_for_angle() {
        assert_eq!(steps_for(360), 4096);
        assert_eq!(steps_for(-5), 56);
        assert_eq!(steps_for(0), 0);
    }

    #[test]
    fn test_from_config_selects_driver() {
        assert!(from_config(&ActuatorConfig::default()).is_ok());
        let config = ActuatorConfig {
            driver: "servo".to_string(),
            ..ActuatorConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(ActuatorError::UnknownDriver(_))
        ));
    }

    #[test]
    fn test_gpio_stepper_exports_pins_low() {
        let root = fake_gpio_root();
        let config = ActuatorConfig::default();
        GpioStepper::with_root(root.path(), &config).unwrap();

        for pin in config.h_pins {
            assert_eq!(read_pin(root.path(), pin), "0");
            let direction =
                fs::read_to_string(root.path().join(format!("gpio{}", pin)).join("direction"))
                    .unwrap();
            assert_eq!(direction, "out");
        }
    }

    #[test]
    fn test_gpio_stepper_rotate_then_sleep_releases_coils() {
        let root = fake_gpio_root();
        let config = ActuatorConfig {
            step_delay_us: 0,
            ..ActuatorConfig::default()
        };
        let mut stepper = GpioStepper::with_root(root.path(), &config).unwrap();

        // 11 half steps end on phase 2
        stepper.rotate(Axis::Horizontal, 1).unwrap();
        let values: Vec<String> = config.h_pins.iter().map(|p| read_pin(root.path(), *p)).collect();
        assert_eq!(values, vec!["0", "1", "0", "0"]);

        stepper.sleep().unwrap();
        for pin in config.h_pins.iter().chain(config.v_pins.iter()) {
            assert_eq!(read_pin(root.path(), *pin), "0");
        }
    }

    #[test]
    fn test_logging_actuator_records_moves() {
        let mut driver = LoggingActuator::default();
        driver.rotate(Axis::Vertical, -10).unwrap();
        driver.sleep().unwrap();
        assert_eq!(driver.moves, vec![(Axis::Vertical, -10)]);
        assert_eq!(driver.sleeps, 1);
    }
}
