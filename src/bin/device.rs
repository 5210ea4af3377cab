use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use telemetry_bridge::device::{Actuators, DeviceAgent, DeviceConfig, GpioActuators, IioDht11, LoggingActuators};
use telemetry_bridge::setup::{setup, shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = DeviceConfig::load().await?;

    let actuators: Box<dyn Actuators> = if config.dry_run {
        info!("dry run, GPIO outputs are logged only");
        Box::new(LoggingActuators::default())
    } else {
        Box::new(
            GpioActuators::new(config.light_pin, config.servo_pin)
                .map_err(|e| eyre!("Failed to set up GPIO: {}", e))?,
        )
    };
    let sensor = IioDht11::new(&config.dht_iio_device);
    info!(
        device = %sensor.device_dir().display(),
        dht_pin = config.dht_pin,
        "reading DHT11 through the IIO driver"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    info!("Press Ctrl+C to exit");
    DeviceAgent::new(config, sensor, actuators).run(shutdown).await
}
