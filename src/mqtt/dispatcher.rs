//! Routes inbound publishes to their topic rule.
//!
//! A valid payload updates the channel slot, the subscription flag and the
//! last-message time, then numeric readings are appended to storage. A storage
//! failure is logged and the in-memory update stays. Invalid payloads are
//! logged and dropped without touching state.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::message_manager::InboundMessage;
use super::mqtt_handler::InboundHandler;
use crate::persistence::SampleStore;
use crate::telemetry::{Channel, ChannelValue, PayloadError, RuleTable, TelemetryStore, TopicRule};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied(Channel),
    Rejected(Channel, PayloadError),
    UnknownTopic,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: RuleTable,
    store: Arc<TelemetryStore>,
    samples: SampleStore,
}

impl Dispatcher {
    pub fn new(rules: RuleTable, store: Arc<TelemetryStore>, samples: SampleStore) -> Self {
        Self {
            rules,
            store,
            samples,
        }
    }

    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let Some(rule) = self.rules.rule_for(&message.topic) else {
            debug!(topic = %message.topic, "ignoring message on unknown topic");
            return DispatchOutcome::UnknownTopic;
        };
        let channel = rule.channel();

        let value = match rule.parse(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    payload = %message.preview(),
                    "discarding invalid {} payload: {}",
                    channel,
                    e
                );
                return DispatchOutcome::Rejected(channel, e);
            }
        };

        self.store
            .record_message(channel, value, message.received_at)
            .await;
        info!(topic = %message.topic, %value, "received {} update", channel);

        if let (TopicRule::Reading(sensor), ChannelValue::Number(reading)) = (rule, value) {
            match self.samples.append(sensor, reading, message.received_at).await {
                Ok(id) => debug!(%sensor, id, "reading persisted"),
                Err(e) => error!(%sensor, value = reading, "failed to persist reading: {}", e),
            }
        }

        DispatchOutcome::Applied(channel)
    }
}

impl InboundHandler for Dispatcher {
    async fn handle(&self, message: InboundMessage) {
        self.dispatch(&message).await;
    }

    async fn on_connected(&self) {
        self.store.set_connected(true).await;
    }

    async fn on_disconnected(&self) {
        self.store.set_connected(false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{
        ChannelState, Direction, LightState, MotionPosition, SensorChannel, TopicNames,
    };
    use chrono::{DateTime, Utc};

    async fn dispatcher() -> (Dispatcher, Arc<TelemetryStore>, SampleStore) {
        let store = Arc::new(TelemetryStore::new());
        let samples = SampleStore::in_memory().await.unwrap();
        let dispatcher = Dispatcher::new(
            RuleTable::new(&TopicNames::default()),
            store.clone(),
            samples.clone(),
        );
        (dispatcher, store, samples)
    }

    #[tokio::test]
    async fn numeric_reading_updates_state_and_appends_one_sample() {
        let (dispatcher, store, samples) = dispatcher().await;
        let message = InboundMessage::new("sensors/temperature", "23.5");

        let outcome = dispatcher.dispatch(&message).await;

        assert_eq!(outcome, DispatchOutcome::Applied(Channel::Temperature));
        assert_eq!(
            store.snapshot(Channel::Temperature).await,
            ChannelState {
                value: ChannelValue::Number(23.5),
                updated_at: message.received_at,
            }
        );
        assert_eq!(samples.count(SensorChannel::Temperature).await.unwrap(), 1);
        assert_eq!(samples.count(SensorChannel::Humidity).await.unwrap(), 0);
        assert!(store.subscriptions().await.temperature);
        assert_eq!(store.connection().await.last_message_at, message.received_at);
    }

    #[tokio::test]
    async fn non_numeric_reading_is_dropped() {
        let (dispatcher, store, samples) = dispatcher().await;

        for payload in ["warm", "", "12,5", "nan"] {
            let outcome = dispatcher
                .dispatch(&InboundMessage::new("sensors/temperature", payload))
                .await;
            assert!(matches!(
                outcome,
                DispatchOutcome::Rejected(Channel::Temperature, _)
            ));
        }

        assert_eq!(
            store.snapshot(Channel::Temperature).await,
            ChannelState::initial(Channel::Temperature)
        );
        assert_eq!(samples.count(SensorChannel::Temperature).await.unwrap(), 0);
        assert!(!store.subscriptions().await.temperature);
        assert_eq!(
            store.connection().await.last_message_at,
            DateTime::<Utc>::UNIX_EPOCH
        );
    }

    #[tokio::test]
    async fn invalid_payload_keeps_previous_value() {
        let (dispatcher, store, _samples) = dispatcher().await;
        dispatcher
            .dispatch(&InboundMessage::new("motion", "left 45"))
            .await;
        let before = store.snapshot(Channel::Motion).await;

        for payload in ["left 91", "up 10", "left"] {
            dispatcher
                .dispatch(&InboundMessage::new("motion", payload))
                .await;
        }

        let after = store.snapshot(Channel::Motion).await;
        assert_eq!(before, after);
        assert_eq!(
            after.value,
            ChannelValue::Motion(MotionPosition {
                direction: Direction::Left,
                angle: 45
            })
        );
    }

    #[tokio::test]
    async fn light_is_not_persisted() {
        let (dispatcher, store, samples) = dispatcher().await;

        let outcome = dispatcher
            .dispatch(&InboundMessage::new("light", " On\n"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Applied(Channel::Light));
        assert_eq!(
            store.snapshot(Channel::Light).await.value,
            ChannelValue::Light(LightState::On)
        );
        assert_eq!(samples.count(SensorChannel::Temperature).await.unwrap(), 0);
        assert_eq!(samples.count(SensorChannel::Humidity).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_topic_is_ignored() {
        let (dispatcher, store, _samples) = dispatcher().await;

        let outcome = dispatcher
            .dispatch(&InboundMessage::new("sensors/pressure", "1013"))
            .await;

        assert_eq!(outcome, DispatchOutcome::UnknownTopic);
        assert_eq!(store.subscriptions().await, Default::default());
    }

    #[tokio::test]
    async fn storage_failure_keeps_memory_update() {
        let (dispatcher, store, samples) = dispatcher().await;
        sqlx::query("DROP TABLE humidity_data")
            .execute(samples.pool())
            .await
            .unwrap();

        let outcome = dispatcher
            .dispatch(&InboundMessage::new("sensors/humidity", "61"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Applied(Channel::Humidity));
        assert_eq!(
            store.snapshot(Channel::Humidity).await.value,
            ChannelValue::Number(61.0)
        );
        assert!(samples.count(SensorChannel::Humidity).await.is_err());
    }

    #[tokio::test]
    async fn connection_callbacks_toggle_flag() {
        let (dispatcher, store, _samples) = dispatcher().await;

        dispatcher.on_connected().await;
        assert!(store.is_connected().await);
        dispatcher.on_disconnected().await;
        assert!(!store.is_connected().await);
    }
}
