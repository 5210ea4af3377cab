//! DHT11 access through the Linux `dht11` IIO driver.
//!
//! With `dtoverlay=dht11,gpiopin=<pin>` the kernel does the bit timing and
//! exposes the last conversion under `/sys/bus/iio/devices/iio:deviceN/`:
//! `in_temp_input` in millidegrees Celsius and `in_humidityrelative_input`
//! in milli-percent. A failed conversion surfaces as an I/O error on read.

use std::future::Future;
use std::path::{Path, PathBuf};

use super::DeviceError;

const TEMPERATURE_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f64,
    pub humidity: f64,
}

pub trait ClimateSensor: Send + Sync + 'static {
    fn read(&self) -> impl Future<Output = Result<ClimateReading, DeviceError>> + Send;
}

#[derive(Debug, Clone)]
pub struct IioDht11 {
    device_dir: PathBuf,
}

impl IioDht11 {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    async fn read_milli(&self, file: &str) -> Result<f64, DeviceError> {
        let path = self.device_dir.join(file);
        let raw = tokio::fs::read_to_string(&path).await?;
        let invalid = || DeviceError::InvalidReading {
            path: path.display().to_string(),
            value: raw.trim().to_string(),
        };
        let milli: i64 = raw.trim().parse().map_err(|_| invalid())?;
        Ok(milli as f64 / 1000.0)
    }
}

impl ClimateSensor for IioDht11 {
    async fn read(&self) -> Result<ClimateReading, DeviceError> {
        let temperature = self.read_milli(TEMPERATURE_FILE).await?;
        let humidity = self.read_milli(HUMIDITY_FILE).await?;
        Ok(ClimateReading {
            temperature,
            humidity,
        })
    }
}
