//! Runtime configuration for both binaries.
//!
//! Values are resolved in three layers: built-in defaults, an optional TOML
//! file, then environment variables. A variable that fails to parse is
//! logged and ignored so the previous layer's value stays in effect.

use axum::http::HeaderValue;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::mqtt::MqttConfig;

pub const CONFIG_DIR: &str = "telemetry-bridge";
pub const BRIDGE_CONFIG_VAR: &str = "TELEMETRY_BRIDGE_CONFIG";
const BRIDGE_CONFIG_FILE: &str = "bridge.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub database_url: String,
    /// `*` or a comma separated origin list.
    pub cors_origins: String,
    pub host: String,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            database_url: "sqlite:telemetry.db?mode=rwc".to_string(),
            cors_origins: "*".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl BridgeConfig {
    pub async fn load() -> Result<Self> {
        let path = config_file_path(BRIDGE_CONFIG_VAR, BRIDGE_CONFIG_FILE);
        let mut config: BridgeConfig = load_toml_or_default(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        info!(
            broker = %config.mqtt.broker_url(),
            port = config.mqtt.broker_port,
            database = %config.database_url,
            "bridge configuration loaded"
        );
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvOverrides::new(lookup);
        env.mqtt(&mut self.mqtt);
        env.string("DATABASE_URL", &mut self.database_url);
        env.string("CORS_ORIGINS", &mut self.cors_origins);
        env.string("HOST", &mut self.host);
        env.parsed("PORT", &mut self.port);
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        let origins = self.cors_origins.trim();
        if origins.is_empty() || origins == "*" {
            return layer.allow_origin(Any);
        }

        let parsed: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(origin, "ignoring invalid CORS origin: {}", e);
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// `$<path_var>` if set, else `<config dir>/telemetry-bridge/<file_name>`.
pub fn config_file_path(path_var: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = std::env::var(path_var) {
        return PathBuf::from(path);
    }
    let mut base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    base.push(CONFIG_DIR);
    base.push(file_name);
    base
}

pub async fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?;
    if !exists {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(T::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    toml::from_str(&content)
        .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
}

/// Environment layer over an arbitrary key lookup.
pub struct EnvOverrides<F> {
    lookup: F,
}

impl<F> EnvOverrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Broker and topic variables shared by both binaries.
    pub fn mqtt(&self, mqtt: &mut MqttConfig) {
        self.string("BROKER_ADDRESS", &mut mqtt.broker_address);
        self.parsed("BROKER_PORT", &mut mqtt.broker_port);
        self.flag("USE_WEBSOCKETS", &mut mqtt.use_websockets);
        self.string("MQTT_CLIENT_ID", &mut mqtt.client_id);
        self.string("TEMP_TOPIC", &mut mqtt.topics.temperature);
        self.string("HUMIDITY_TOPIC", &mut mqtt.topics.humidity);
        self.string("CONTROL_TOPIC", &mut mqtt.topics.light);
        self.string("MOTION_TOPIC", &mut mqtt.topics.motion);
    }

    pub fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(key) {
            *target = value;
        }
    }

    pub fn parsed<T>(&self, key: &str, target: &mut T)
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return;
        };
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(e) => warn!(key, value = %raw, "ignoring invalid value: {}", e),
        }
    }

    /// `true`/`1`/`yes`/`on` and their negatives, case-insensitive.
    pub fn flag(&self, key: &str, target: &mut bool) {
        let Some(raw) = (self.lookup)(key) else {
            return;
        };
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => *target = true,
            "false" | "0" | "no" | "off" => *target = false,
            _ => warn!(key, value = %raw, "ignoring invalid boolean"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.mqtt.broker_address, "localhost");
        assert_eq!(config.mqtt.broker_port, 9001);
        assert!(config.mqtt.use_websockets);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup(&[
            ("BROKER_ADDRESS", "10.0.0.5"),
            ("BROKER_PORT", "1883"),
            ("USE_WEBSOCKETS", "False"),
            ("CONTROL_TOPIC", "home/light"),
            ("PORT", "8000"),
        ]));

        assert_eq!(config.mqtt.broker_address, "10.0.0.5");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert!(!config.mqtt.use_websockets);
        assert_eq!(config.mqtt.topics.light, "home/light");
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn invalid_values_keep_previous_setting() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup(&[("BROKER_PORT", "lots"), ("USE_WEBSOCKETS", "maybe")]));
        assert_eq!(config.mqtt.broker_port, 9001);
        assert!(config.mqtt.use_websockets);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            port = 6000

            [mqtt]
            broker_address = "mqtt.lan"

            [mqtt.topics]
            motion = "pan"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.mqtt.broker_address, "mqtt.lan");
        assert_eq!(config.mqtt.broker_port, 9001);
        assert_eq!(config.mqtt.topics.motion, "pan");
        assert_eq!(config.mqtt.topics.light, "light");
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("telemetry-bridge-does-not-exist.toml");
        let config: BridgeConfig = load_toml_or_default(&path).await.unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("telemetry-bridge-bad-{}.toml", std::process::id()));
        tokio::fs::write(&path, "port = \"not a number\"").await.unwrap();
        let result: Result<BridgeConfig> = load_toml_or_default(&path).await;
        tokio::fs::remove_file(&path).await.unwrap();
        assert!(result.is_err());
    }
}
