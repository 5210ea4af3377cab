//! Payload grammars per topic.
//!
//! Each `TopicRule` owns the parser for its topic. The same parsers validate
//! inbound broker messages, REST control bodies and the device agent's
//! commands, so all three sides agree on what a valid command is.

use super::{Channel, ChannelValue, Direction, LightState, MotionPosition, SensorChannel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const MAX_MOTION_ANGLE: i64 = 90;

/// A payload that does not match its topic's grammar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("not a decimal number: {0:?}")]
    NotANumber(String),

    #[error("number is not finite: {0:?}")]
    NonFinite(String),

    #[error("invalid light state {0:?}, must be 'on' or 'off'")]
    InvalidLightState(String),

    #[error("invalid motion format {0:?}, expected '<left|right> <0-90>'")]
    InvalidMotionFormat(String),

    #[error("invalid direction {0:?}, must be 'left' or 'right'")]
    InvalidDirection(String),

    #[error("angle must be a number between 0 and 90, got {0:?}")]
    InvalidAngle(String),

    #[error("angle must be between 0 and 90 degrees, got {0}")]
    AngleOutOfRange(i64),
}

/// Topic names, overridable per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub temperature: String,
    pub humidity: String,
    pub light: String,
    pub motion: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            temperature: "sensors/temperature".to_string(),
            humidity: "sensors/humidity".to_string(),
            light: "light".to_string(),
            motion: "motion".to_string(),
        }
    }
}

impl TopicNames {
    pub fn for_channel(&self, channel: Channel) -> &str {
        match channel {
            Channel::Temperature => &self.temperature,
            Channel::Humidity => &self.humidity,
            Channel::Light => &self.light,
            Channel::Motion => &self.motion,
        }
    }

    pub fn all(&self) -> Vec<String> {
        Channel::ALL
            .iter()
            .map(|channel| self.for_channel(*channel).to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRule {
    Reading(SensorChannel),
    Light,
    Motion,
}

impl TopicRule {
    pub fn channel(&self) -> Channel {
        match self {
            TopicRule::Reading(sensor) => sensor.channel(),
            TopicRule::Light => Channel::Light,
            TopicRule::Motion => Channel::Motion,
        }
    }

    pub fn parse(&self, payload: &[u8]) -> Result<ChannelValue, PayloadError> {
        let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        match self {
            TopicRule::Reading(_) => parse_number(text).map(ChannelValue::Number),
            TopicRule::Light => parse_light(text).map(ChannelValue::Light),
            TopicRule::Motion => parse_motion(text).map(ChannelValue::Motion),
        }
    }
}

/// Topic → rule lookup built from the configured topic names.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: HashMap<String, TopicRule>,
}

impl RuleTable {
    pub fn new(topics: &TopicNames) -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            topics.temperature.clone(),
            TopicRule::Reading(SensorChannel::Temperature),
        );
        rules.insert(
            topics.humidity.clone(),
            TopicRule::Reading(SensorChannel::Humidity),
        );
        rules.insert(topics.light.clone(), TopicRule::Light);
        rules.insert(topics.motion.clone(), TopicRule::Motion);
        Self { rules }
    }

    pub fn rule_for(&self, topic: &str) -> Option<TopicRule> {
        self.rules.get(topic).copied()
    }
}

pub fn parse_number(text: &str) -> Result<f64, PayloadError> {
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| PayloadError::NotANumber(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(PayloadError::NonFinite(trimmed.to_string()));
    }
    Ok(value)
}

pub fn parse_light(text: &str) -> Result<LightState, PayloadError> {
    match text.trim().to_lowercase().as_str() {
        "on" => Ok(LightState::On),
        "off" => Ok(LightState::Off),
        other => Err(PayloadError::InvalidLightState(other.to_string())),
    }
}

pub fn parse_direction(text: &str) -> Result<Direction, PayloadError> {
    match text.trim().to_lowercase().as_str() {
        "left" => Ok(Direction::Left),
        "right" => Ok(Direction::Right),
        other => Err(PayloadError::InvalidDirection(other.to_string())),
    }
}

pub fn validate_angle(angle: i64) -> Result<u8, PayloadError> {
    if !(0..=MAX_MOTION_ANGLE).contains(&angle) {
        return Err(PayloadError::AngleOutOfRange(angle));
    }
    // in range, so the cast is lossless
    Ok(angle as u8)
}

/// Builds a motion command from already separated fields (REST bodies).
pub fn motion_from_parts(direction: &str, angle: i64) -> Result<MotionPosition, PayloadError> {
    Ok(MotionPosition {
        direction: parse_direction(direction)?,
        angle: validate_angle(angle)?,
    })
}

/// `<left|right> <integer 0..90>`, whitespace separated, case-insensitive.
/// Tokens after the angle are ignored.
pub fn parse_motion(text: &str) -> Result<MotionPosition, PayloadError> {
    let normalized = text.trim().to_lowercase();
    let mut parts = normalized.split_whitespace();
    let (Some(direction), Some(angle)) = (parts.next(), parts.next()) else {
        return Err(PayloadError::InvalidMotionFormat(normalized.clone()));
    };

    let direction = parse_direction(direction)?;
    let angle: i64 = angle
        .parse()
        .map_err(|_| PayloadError::InvalidAngle(angle.to_string()))?;

    Ok(MotionPosition {
        direction,
        angle: validate_angle(angle)?,
    })
}
