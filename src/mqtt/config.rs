use crate::telemetry::TopicNames;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker endpoint and topic layout shared by the bridge and the device agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_address: String,
    pub broker_port: u16,
    /// WebSocket transport instead of raw TCP.
    pub use_websockets: bool,
    /// Path of the WebSocket endpoint, ignored for TCP.
    pub websocket_path: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub topics: TopicNames,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_address: "localhost".to_string(),
            broker_port: 9001,
            use_websockets: true,
            websocket_path: "/mqtt".to_string(),
            client_id: "telemetry-bridge".to_string(),
            keep_alive_secs: 60,
            topics: TopicNames::default(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }

    /// Address handed to rumqttc: a `ws://` URL for WebSockets, the bare host otherwise.
    pub fn broker_url(&self) -> String {
        if self.use_websockets {
            let path = if self.websocket_path.starts_with('/') {
                self.websocket_path.clone()
            } else {
                format!("/{}", self.websocket_path)
            };
            format!("ws://{}:{}{}", self.broker_address, self.broker_port, path)
        } else {
            self.broker_address.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_includes_port_and_path() {
        let config = MqttConfig {
            broker_address: "broker.local".to_string(),
            broker_port: 8080,
            websocket_path: "ws".to_string(),
            ..MqttConfig::default()
        };
        assert_eq!(config.broker_url(), "ws://broker.local:8080/ws");
    }

    #[test]
    fn tcp_uses_bare_host() {
        let config = MqttConfig {
            use_websockets: false,
            ..MqttConfig::default()
        };
        assert_eq!(config.broker_url(), "localhost");
    }

    #[test]
    fn keep_alive_has_a_floor() {
        let config = MqttConfig {
            keep_alive_secs: 0,
            ..MqttConfig::default()
        };
        assert_eq!(config.keep_alive(), Duration::from_secs(5));
    }
}
