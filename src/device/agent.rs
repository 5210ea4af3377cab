//! Device-side lifecycle: act on commands, publish readings, clean up.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::DeviceConfig;
use super::hal::{duty_cycle, servo_angle, Actuators, SERVO_CENTER};
use super::sensor::{ClimateReading, ClimateSensor};
use super::DeviceError;
use crate::mqtt::{BrokerHandle, BrokerLink, InboundHandler, InboundMessage};
use crate::telemetry::{ChannelValue, LightState, RuleTable, TopicNames, TopicRule};

/// How long the servo is driven before the pulse train is stopped.
pub const SERVO_HOLD: Duration = Duration::from_millis(500);

/// Applies light and motion commands to the outputs.
pub struct CommandHandler {
    rules: RuleTable,
    actuators: Mutex<Box<dyn Actuators>>,
    servo_hold: Duration,
}

impl CommandHandler {
    pub fn new(topics: &TopicNames, actuators: Box<dyn Actuators>) -> Self {
        Self {
            rules: RuleTable::new(topics),
            actuators: Mutex::new(actuators),
            servo_hold: SERVO_HOLD,
        }
    }

    pub fn with_servo_hold(mut self, hold: Duration) -> Self {
        self.servo_hold = hold;
        self
    }

    pub async fn apply(&self, message: &InboundMessage) -> Result<(), DeviceError> {
        let rule = match self.rules.rule_for(&message.topic) {
            Some(rule @ (TopicRule::Light | TopicRule::Motion)) => rule,
            _ => return Err(DeviceError::UnhandledTopic(message.topic.clone())),
        };

        match rule.parse(&message.payload)? {
            ChannelValue::Light(state) => self.set_light(state).await,
            ChannelValue::Motion(position) => self.move_servo(servo_angle(position)).await,
            ChannelValue::Number(_) => Err(DeviceError::UnhandledTopic(message.topic.clone())),
        }
    }

    pub async fn set_light(&self, state: LightState) -> Result<(), DeviceError> {
        self.actuators.lock().await.set_light(state.is_on())?;
        info!("Light turned {}", state);
        Ok(())
    }

    /// Drives the servo to `angle`, holds, then stops the pulse to avoid jitter.
    pub async fn move_servo(&self, angle: u8) -> Result<(), DeviceError> {
        let mut actuators = self.actuators.lock().await;
        actuators.set_servo_duty(duty_cycle(angle))?;
        tokio::time::sleep(self.servo_hold).await;
        actuators.set_servo_duty(0.0)?;
        info!(angle, "servo moved");
        Ok(())
    }

    pub async fn release(&self) -> Result<(), DeviceError> {
        self.actuators.lock().await.release()
    }
}

impl InboundHandler for CommandHandler {
    async fn handle(&self, message: InboundMessage) {
        debug!(%message, "command received");
        if let Err(e) = self.apply(&message).await {
            warn!(topic = %message.topic, payload = %message.preview(), "ignoring command: {}", e);
        }
    }

    async fn on_connected(&self) {
        info!("device connected to broker");
    }

    async fn on_disconnected(&self) {
        warn!("device lost broker connection");
    }
}

/// `(topic, payload)` pairs published for one reading.
pub fn reading_messages(topics: &TopicNames, reading: ClimateReading) -> [(String, String); 2] {
    [
        (topics.temperature.clone(), reading.temperature.to_string()),
        (topics.humidity.clone(), reading.humidity.to_string()),
    ]
}

/// Reads the sensor every `interval` and publishes until cancelled.
/// A failed read is logged and retried on the next tick.
pub async fn run_sensor_loop<S: ClimateSensor>(
    sensor: S,
    broker: BrokerHandle,
    topics: TopicNames,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!(?interval, "starting sensor publishing");
    let mut ticker = tokio::time::interval(interval);
    'ticks: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reading = match sensor.read().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Sensor read failed, retrying: {}", e);
                continue;
            }
        };
        info!(
            temperature = reading.temperature,
            humidity = reading.humidity,
            "sensor reading"
        );
        for (topic, payload) in reading_messages(&topics, reading) {
            // publish waits while the request queue is full, e.g. broker offline
            tokio::select! {
                _ = shutdown.cancelled() => break 'ticks,
                result = broker.publish(&topic, payload) => {
                    if let Err(e) = result {
                        error!(%topic, "failed to publish reading: {}", e);
                    }
                }
            }
        }
    }
    info!("sensor loop stopped");
}

/// Wires the command handler, the broker link and the sensor loop together.
pub struct DeviceAgent<S: ClimateSensor> {
    config: DeviceConfig,
    sensor: S,
    handler: Arc<CommandHandler>,
}

impl<S: ClimateSensor> DeviceAgent<S> {
    pub fn new(config: DeviceConfig, sensor: S, actuators: Box<dyn Actuators>) -> Self {
        let handler = Arc::new(CommandHandler::new(&config.mqtt.topics, actuators));
        Self {
            config,
            sensor,
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<CommandHandler> {
        &self.handler
    }

    /// Runs until `shutdown` is cancelled, then drives the light low, stops the
    /// servo and disconnects.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let topics = self.config.mqtt.topics.clone();

        self.handler
            .move_servo(SERVO_CENTER)
            .await
            .map_err(|e| eyre!("Failed to center servo: {}", e))?;

        let link = BrokerLink::configure(&self.config.mqtt);
        let broker = link.handle();
        let link = link.start(
            self.handler.clone(),
            vec![topics.light.clone(), topics.motion.clone()],
        );

        let sensor_task = tokio::spawn(run_sensor_loop(
            self.sensor,
            broker,
            topics,
            self.config.read_interval(),
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        info!("Exiting program...");

        if let Err(e) = sensor_task.await {
            error!("sensor task failed: {}", e);
        }
        if let Err(e) = self.handler.release().await {
            error!("failed to release outputs: {}", e);
        }
        link.shutdown()
            .await
            .map_err(|e| eyre!("Failed to stop broker link: {}", e))?;
        info!("Cleaned up and disconnected");
        Ok(())
    }
}
