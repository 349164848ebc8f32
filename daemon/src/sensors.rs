//! Optional temperature and humidity readings for the status surface.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SensorsConfig;
use crate::state::SharedState;

pub trait Sensor: Send {
    fn read(&mut self) -> Result<f32>;
}

/// A sysfs/IIO style file holding one integer, e.g.
/// `/sys/bus/iio/devices/iio:device0/in_temp_input`.
pub struct FileSensor {
    path: PathBuf,
    scale: f32,
}

impl FileSensor {
    pub fn new(path: impl AsRef<Path>, scale: f32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            scale,
        }
    }
}

impl Sensor for FileSensor {
    fn read(&mut self) -> Result<f32> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let value: f32 = raw
            .trim()
            .parse()
            .with_context(|| format!("non-numeric reading {:?} in {}", raw.trim(), self.path.display()))?;
        Ok(value * self.scale)
    }
}

/// Copies sensor readings into shared state. A failed read keeps the last
/// good value; an unconfigured sensor stays `None`.
pub struct SensorPoller {
    state: Arc<SharedState>,
    temperature: Option<Box<dyn Sensor>>,
    humidity: Option<Box<dyn Sensor>>,
}

impl SensorPoller {
    pub fn new(
        state: Arc<SharedState>,
        temperature: Option<Box<dyn Sensor>>,
        humidity: Option<Box<dyn Sensor>>,
    ) -> Self {
        Self {
            state,
            temperature,
            humidity,
        }
    }

    pub fn from_config(state: Arc<SharedState>, config: &SensorsConfig) -> Self {
        let file = |path: &Option<String>| {
            path.as_ref()
                .map(|p| Box::new(FileSensor::new(p, config.scale)) as Box<dyn Sensor>)
        };
        Self::new(
            state,
            file(&config.temperature_path),
            file(&config.humidity_path),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.temperature.is_some() || self.humidity.is_some()
    }

    pub fn tick(&mut self) -> Result<()> {
        let temperature = sample(
            "temperature",
            self.temperature.as_mut(),
            self.state.sensors.temperature(),
        );
        let humidity = sample(
            "humidity",
            self.humidity.as_mut(),
            self.state.sensors.humidity(),
        );
        debug!("Sensors: temperature={:?} humidity={:?}", temperature, humidity);
        self.state.sensors.update(temperature, humidity);
        Ok(())
    }
}

fn sample(name: &str, sensor: Option<&mut Box<dyn Sensor>>, previous: Option<f32>) -> Option<f32> {
    let sensor = sensor?;
    match sensor.read() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} sensor read failed: {:#}", name, e);
            previous
        }
    }
}
