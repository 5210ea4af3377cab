//! # Device Agent
//!
//! Runs on the Raspberry Pi next to the sensor and the actuators.
//!
//! ```text
//! device/
//! ├── config.rs  - pins, read interval, broker endpoint
//! ├── hal.rs     - light output and servo PWM (rppal or dry run)
//! ├── sensor.rs  - DHT11 readings through the IIO kernel driver
//! └── agent.rs   - command handler, sensor publish loop, lifecycle
//! ```
//!
//! The agent speaks the same topic grammar as the bridge: it publishes
//! readings on the sensor topics and acts on the light and motion topics.

pub mod agent;
pub mod config;
pub mod hal;
pub mod sensor;

pub use agent::{run_sensor_loop, CommandHandler, DeviceAgent};
pub use config::DeviceConfig;
pub use hal::{Actuators, GpioActuators, LoggingActuators};
pub use sensor::{ClimateReading, ClimateSensor, IioDht11};

use thiserror::Error;

use crate::telemetry::PayloadError;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("sensor read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sensor value {value:?} in {path}")]
    InvalidReading { path: String, value: String },

    #[error("invalid command: {0}")]
    Command(#[from] PayloadError),

    #[error("no actuator listens on topic {0}")]
    UnhandledTopic(String),
}
