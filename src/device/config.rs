use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::{config_file_path, load_toml_or_default, EnvOverrides};
use crate::mqtt::MqttConfig;

pub const DEVICE_CONFIG_VAR: &str = "TELEMETRY_DEVICE_CONFIG";
const DEVICE_CONFIG_FILE: &str = "device.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub mqtt: MqttConfig,
    /// BCM pin of the DHT11 data line. The kernel overlay owns the pin, this is informational.
    pub dht_pin: u8,
    pub light_pin: u8,
    pub servo_pin: u8,
    pub read_interval_secs: u64,
    /// IIO device directory exposed by the `dht11` kernel driver.
    pub dht_iio_device: PathBuf,
    /// Log actuator calls instead of driving GPIO.
    pub dry_run: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_port: 8080,
                client_id: "telemetry-device".to_string(),
                ..MqttConfig::default()
            },
            dht_pin: 17,
            light_pin: 27,
            servo_pin: 24,
            read_interval_secs: 2,
            dht_iio_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            dry_run: false,
        }
    }
}

impl DeviceConfig {
    pub async fn load() -> Result<Self> {
        let path = config_file_path(DEVICE_CONFIG_VAR, DEVICE_CONFIG_FILE);
        let mut config: DeviceConfig = load_toml_or_default(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        info!(
            broker = %config.mqtt.broker_url(),
            port = config.mqtt.broker_port,
            dht_pin = config.dht_pin,
            light_pin = config.light_pin,
            servo_pin = config.servo_pin,
            interval_secs = config.read_interval_secs,
            dry_run = config.dry_run,
            "device configuration loaded"
        );
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvOverrides::new(lookup);
        env.mqtt(&mut self.mqtt);
        env.parsed("DHT_PIN", &mut self.dht_pin);
        env.parsed("LIGHT_GPIO_PIN", &mut self.light_pin);
        env.parsed("SERVO_PIN", &mut self.servo_pin);
        env.parsed("READ_INTERVAL", &mut self.read_interval_secs);
        env.parsed("DHT_IIO_DEVICE", &mut self.dht_iio_device);
        env.flag("DEVICE_DRY_RUN", &mut self.dry_run);
    }

    /// Never shorter than one second.
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.read_interval_secs.max(1))
    }
}
