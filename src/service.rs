//! Query and control surface shared by the REST layer.
//!
//! Reads come from the in-memory store (latest values, connection status) or
//! the sample store (history, stats). Control commands go out through the
//! broker handle and, once the client accepts them, are applied to the store
//! without waiting for the broker to echo them back.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::mqtt::{BrokerHandle, LinkError};
use crate::persistence::{HistoryQuery, PersistenceError, SampleStats, SampleStore, SensorSample};
use crate::telemetry::{
    staleness_window, Channel, ChannelState, ChannelValue, LightState, MotionPosition,
    PayloadError, SensorChannel, SubscriptionFlags, TelemetryStore, TopicNames,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{} is stale or not available", .0.label())]
    Stale(Channel),

    #[error(transparent)]
    Storage(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("MQTT client is not connected")]
    NotConnected,

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] PayloadError),

    #[error("failed to publish: {0}")]
    PublishFailed(#[source] LinkError),
}

/// A validated actuator command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Light(LightState),
    Motion(MotionPosition),
}

impl ControlCommand {
    pub fn channel(&self) -> Channel {
        match self {
            ControlCommand::Light(_) => Channel::Light,
            ControlCommand::Motion(_) => Channel::Motion,
        }
    }

    pub fn payload(&self) -> String {
        match self {
            ControlCommand::Light(state) => state.as_str().to_string(),
            ControlCommand::Motion(position) => position.to_payload(),
        }
    }

    fn value(&self) -> ChannelValue {
        match self {
            ControlCommand::Light(state) => ChannelValue::Light(*state),
            ControlCommand::Motion(position) => ChannelValue::Motion(*position),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Connected and a valid message arrived within the staleness window.
    pub active: bool,
    pub last_message_at: DateTime<Utc>,
    pub subscriptions: SubscriptionFlags,
}

#[derive(Debug, Clone)]
pub struct TelemetryService {
    store: Arc<TelemetryStore>,
    samples: SampleStore,
    broker: BrokerHandle,
    topics: TopicNames,
}

impl TelemetryService {
    pub fn new(
        store: Arc<TelemetryStore>,
        samples: SampleStore,
        broker: BrokerHandle,
        topics: TopicNames,
    ) -> Self {
        Self {
            store,
            samples,
            broker,
            topics,
        }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub async fn latest(&self, channel: Channel) -> Result<ChannelState, QueryError> {
        self.latest_at(channel, Utc::now()).await
    }

    pub async fn latest_at(
        &self,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<ChannelState, QueryError> {
        let state = self.store.snapshot(channel).await;
        if state.is_fresh_at(now) {
            Ok(state)
        } else {
            Err(QueryError::Stale(channel))
        }
    }

    pub async fn history(
        &self,
        channel: SensorChannel,
        query: HistoryQuery,
    ) -> Result<Vec<SensorSample>, QueryError> {
        Ok(self.samples.history(channel, query).await?)
    }

    pub async fn stats(&self, channel: SensorChannel) -> Result<SampleStats, QueryError> {
        Ok(self.samples.stats(channel).await?)
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.connection_status_at(Utc::now()).await
    }

    pub async fn connection_status_at(&self, now: DateTime<Utc>) -> ConnectionStatus {
        let connection = self.store.connection().await;
        let since_last: TimeDelta = now.signed_duration_since(connection.last_message_at);
        ConnectionStatus {
            connected: connection.connected,
            active: connection.connected && since_last < staleness_window(),
            last_message_at: connection.last_message_at,
            subscriptions: self.store.subscriptions().await,
        }
    }

    /// Publishes the command and applies it to the store once the client accepts it.
    pub async fn publish_control(&self, command: ControlCommand) -> Result<(), ControlError> {
        if !self.store.is_connected().await {
            warn!(?command, "rejecting control command, broker link is down");
            return Err(ControlError::NotConnected);
        }

        let channel = command.channel();
        let topic = self.topics.for_channel(channel);
        let payload = command.payload();

        if let Err(e) = self.broker.publish(topic, payload.as_bytes()).await {
            error!(topic, %payload, "control publish failed: {}", e);
            return Err(ControlError::PublishFailed(e));
        }

        self.store.set(channel, command.value(), Utc::now()).await;
        info!(topic, %payload, "control command published");
        Ok(())
    }

    /// Debug passthrough, no validation and no state change.
    pub async fn publish_raw(&self, topic: &str, payload: &str) -> Result<(), ControlError> {
        if !self.store.is_connected().await {
            return Err(ControlError::NotConnected);
        }
        self.broker
            .publish(topic, payload.as_bytes())
            .await
            .map_err(ControlError::PublishFailed)?;
        info!(topic, payload, "raw message published");
        Ok(())
    }
}
