//! Shared state container.
//!
//! One `TelemetryStore` is created at start-up and shared (`Arc`) between the
//! broker dispatch path and the REST handlers. Every channel has its own
//! lock, so a reader never observes a half-written `ChannelState`. There is no
//! ordering across channels.

use super::{Channel, ChannelState, ChannelValue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_message_at: DateTime<Utc>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            last_message_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Set once the first valid message for a channel has been seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionFlags {
    pub temperature: bool,
    pub humidity: bool,
    pub light: bool,
    pub motion: bool,
}

impl SubscriptionFlags {
    pub fn get(&self, channel: Channel) -> bool {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
            Channel::Light => self.light,
            Channel::Motion => self.motion,
        }
    }

    fn mark(&mut self, channel: Channel) {
        match channel {
            Channel::Temperature => self.temperature = true,
            Channel::Humidity => self.humidity = true,
            Channel::Light => self.light = true,
            Channel::Motion => self.motion = true,
        }
    }
}

#[derive(Debug)]
pub struct TelemetryStore {
    temperature: RwLock<ChannelState>,
    humidity: RwLock<ChannelState>,
    light: RwLock<ChannelState>,
    motion: RwLock<ChannelState>,
    connection: RwLock<ConnectionState>,
    subscriptions: RwLock<SubscriptionFlags>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            temperature: RwLock::new(ChannelState::initial(Channel::Temperature)),
            humidity: RwLock::new(ChannelState::initial(Channel::Humidity)),
            light: RwLock::new(ChannelState::initial(Channel::Light)),
            motion: RwLock::new(ChannelState::initial(Channel::Motion)),
            connection: RwLock::new(ConnectionState::default()),
            subscriptions: RwLock::new(SubscriptionFlags::default()),
        }
    }

    fn slot(&self, channel: Channel) -> &RwLock<ChannelState> {
        match channel {
            Channel::Temperature => &self.temperature,
            Channel::Humidity => &self.humidity,
            Channel::Light => &self.light,
            Channel::Motion => &self.motion,
        }
    }

    pub async fn snapshot(&self, channel: Channel) -> ChannelState {
        *self.slot(channel).read().await
    }

    /// Overwrites the channel value. `updated_at` never moves backwards.
    pub async fn set(&self, channel: Channel, value: ChannelValue, at: DateTime<Utc>) {
        let mut state = self.slot(channel).write().await;
        state.value = value;
        state.updated_at = state.updated_at.max(at);
        debug!(%channel, %value, "channel state updated");
    }

    /// Inbound message bookkeeping: value, subscription flag and last-message time.
    pub async fn record_message(&self, channel: Channel, value: ChannelValue, at: DateTime<Utc>) {
        self.set(channel, value, at).await;
        self.subscriptions.write().await.mark(channel);
        let mut connection = self.connection.write().await;
        connection.last_message_at = connection.last_message_at.max(at);
    }

    pub async fn set_connected(&self, connected: bool) {
        self.connection.write().await.connected = connected;
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.connected
    }

    pub async fn connection(&self) -> ConnectionState {
        *self.connection.read().await
    }

    pub async fn subscriptions(&self) -> SubscriptionFlags {
        *self.subscriptions.read().await
    }
}
