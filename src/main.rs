use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use telemetry_bridge::api;
use telemetry_bridge::config::BridgeConfig;
use telemetry_bridge::mqtt::{BrokerLink, Dispatcher};
use telemetry_bridge::persistence::SampleStore;
use telemetry_bridge::service::TelemetryService;
use telemetry_bridge::setup::{setup, shutdown_signal};
use telemetry_bridge::telemetry::{RuleTable, TelemetryStore};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = BridgeConfig::load().await?;

    let samples = SampleStore::connect(&config.database_url)
        .await
        .map_err(|e| eyre!("Failed to open database {}: {}", config.database_url, e))?;
    let store = Arc::new(TelemetryStore::new());

    let topics = config.mqtt.topics.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        RuleTable::new(&topics),
        store.clone(),
        samples.clone(),
    ));

    let link = BrokerLink::configure(&config.mqtt);
    let service = TelemetryService::new(store, samples, link.handle(), topics.clone());
    let link = link.start(dispatcher, topics.all());

    let app = api::router(service, config.cors_layer());
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| eyre!("Failed to bind {}: {}", address, e))?;
    info!(%address, "REST API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!("HTTP server stopped with error: {}", e);
    }

    info!("shutting down");
    link.shutdown()
        .await
        .map_err(|e| eyre!("Failed to stop broker link: {}", e))?;
    served.map_err(|e| eyre!("HTTP server failed: {}", e))
}
