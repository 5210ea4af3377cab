//! # Telemetry Model
//!
//! Logical channels carried over MQTT and the in-memory record kept for each
//! of them. Only the most recent value per channel is held; history lives in
//! the persistence layer.
//!
//! ```text
//! telemetry/
//! ├── rules.rs  - payload grammars and the topic → rule table
//! └── store.rs  - shared state container (channel slots, connection, flags)
//! ```

pub mod rules;
pub mod store;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;

pub use rules::{PayloadError, RuleTable, TopicNames, TopicRule};
pub use store::{ConnectionState, SubscriptionFlags, TelemetryStore};

/// Readings older than this are reported as unavailable.
pub const STALENESS_WINDOW_SECS: i64 = 300;

pub fn staleness_window() -> TimeDelta {
    TimeDelta::seconds(STALENESS_WINDOW_SECS)
}

/// Closed set of channels the bridge tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Temperature,
    Humidity,
    Light,
    Motion,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Temperature,
        Channel::Humidity,
        Channel::Light,
        Channel::Motion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
            Channel::Light => "light",
            Channel::Motion => "motion",
        }
    }

    /// Human readable label used in error bodies ("Temperature data is stale ...").
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Temperature => "Temperature data",
            Channel::Humidity => "Humidity data",
            Channel::Light => "Light status",
            Channel::Motion => "Motion status",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric channels, the only ones that are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    Temperature,
    Humidity,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 2] = [SensorChannel::Temperature, SensorChannel::Humidity];

    pub fn channel(&self) -> Channel {
        match self {
            SensorChannel::Temperature => Channel::Temperature,
            SensorChannel::Humidity => Channel::Humidity,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            SensorChannel::Temperature => "temperature_data",
            SensorChannel::Humidity => "humidity_data",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.channel().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightState {
    On,
    Off,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightState::On => "on",
            LightState::Off => "off",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, LightState::On)
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pan direction. `Center` is only the start-up value and never parsed from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Center,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Center => "center",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pan offset from center, `angle` in degrees (0..=90 for parsed commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotionPosition {
    pub direction: Direction,
    pub angle: u8,
}

impl MotionPosition {
    pub const CENTER: MotionPosition = MotionPosition {
        direction: Direction::Center,
        angle: 0,
    };

    /// Wire form, e.g. `left 45`.
    pub fn to_payload(&self) -> String {
        format!("{} {}", self.direction, self.angle)
    }
}

impl fmt::Display for MotionPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.angle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    Number(f64),
    Light(LightState),
    Motion(MotionPosition),
}

impl ChannelValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ChannelValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<LightState> {
        match self {
            ChannelValue::Light(state) => Some(*state),
            _ => None,
        }
    }

    pub fn as_motion(&self) -> Option<MotionPosition> {
        match self {
            ChannelValue::Motion(position) => Some(*position),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelValue::Number(v) => write!(f, "{}", v),
            ChannelValue::Light(state) => state.fmt(f),
            ChannelValue::Motion(position) => position.fmt(f),
        }
    }
}

/// Latest value of a channel and when it was received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub value: ChannelValue,
    pub updated_at: DateTime<Utc>,
}

impl ChannelState {
    /// Start-up record: default value, epoch timestamp, therefore stale.
    pub fn initial(channel: Channel) -> Self {
        let value = match channel {
            Channel::Temperature | Channel::Humidity => ChannelValue::Number(0.0),
            Channel::Light => ChannelValue::Light(LightState::Off),
            Channel::Motion => ChannelValue::Motion(MotionPosition::CENTER),
        };
        Self {
            value,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Fresh while `now - updated_at <= 300s`; the boundary itself is fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) <= staleness_window()
    }
}

/// Seconds since the epoch as a float, the JSON timestamp format.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_states_are_stale() {
        let now = Utc::now();
        for channel in Channel::ALL {
            assert!(!ChannelState::initial(channel).is_fresh_at(now));
        }
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let updated_at = Utc::now();
        let state = ChannelState {
            value: ChannelValue::Number(21.5),
            updated_at,
        };

        assert!(state.is_fresh_at(updated_at + TimeDelta::seconds(300)));
        assert!(!state.is_fresh_at(updated_at + TimeDelta::seconds(300) + TimeDelta::milliseconds(1)));
        assert!(!state.is_fresh_at(updated_at + TimeDelta::seconds(301)));
    }

    #[test]
    fn motion_payload_matches_wire_grammar() {
        let position = MotionPosition {
            direction: Direction::Right,
            angle: 30,
        };
        assert_eq!(position.to_payload(), "right 30");
    }
}
