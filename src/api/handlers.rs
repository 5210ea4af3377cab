use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::error::ApiError;
use crate::persistence::{HistoryQuery, SampleStats, SensorSample, DEFAULT_HISTORY_LIMIT};
use crate::service::{ConnectionStatus, ControlCommand, ControlError, TelemetryService};
use crate::telemetry::rules::{motion_from_parts, parse_direction, parse_light, PayloadError};
use crate::telemetry::{epoch_secs, Channel, LightState, MotionPosition, SensorChannel};

type ApiResult<T> = Result<T, ApiError>;

// ----- health / fallback -----

pub async fn health() -> Json<Value> {
    Json(json!({
        "message": "Health",
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found." })),
    )
}

// ----- sensor readings -----

pub async fn get_temperature(State(service): State<TelemetryService>) -> ApiResult<Json<Value>> {
    latest_reading(&service, SensorChannel::Temperature).await
}

pub async fn get_humidity(State(service): State<TelemetryService>) -> ApiResult<Json<Value>> {
    latest_reading(&service, SensorChannel::Humidity).await
}

async fn latest_reading(service: &TelemetryService, sensor: SensorChannel) -> ApiResult<Json<Value>> {
    let state = service.latest(sensor.channel()).await?;
    let value = state.value.as_number().unwrap_or_default();
    Ok(Json(json!({
        (sensor.channel().as_str()): value,
        "timestamp": epoch_secs(state.updated_at),
    })))
}

/// Raw query values. Unparseable values fall back to the default (`limit`)
/// or to no bound (`start_time`, `end_time`).
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<String>,
    /// Epoch seconds, inclusive.
    pub start_time: Option<String>,
    /// Epoch seconds, exclusive.
    pub end_time: Option<String>,
}

impl HistoryParams {
    fn into_query(self) -> ApiResult<HistoryQuery> {
        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_HISTORY_LIMIT,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(limit = raw, "ignoring invalid history limit");
                DEFAULT_HISTORY_LIMIT
            }),
        };
        Ok(HistoryQuery {
            limit,
            start: epoch_param("start_time", self.start_time.as_deref())
                .map(from_epoch_secs)
                .transpose()?,
            end: epoch_param("end_time", self.end_time.as_deref())
                .map(from_epoch_secs)
                .transpose()?,
        })
    }
}

fn epoch_param(name: &str, raw: Option<&str>) -> Option<f64> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() => Some(secs),
        _ => {
            warn!(param = name, value = raw, "ignoring invalid history bound");
            None
        }
    }
}

fn from_epoch_secs(secs: f64) -> ApiResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis((secs * 1000.0).round() as i64)
        .ok_or_else(|| ApiError::BadRequest(format!("timestamp {secs} is out of range")))
}

#[derive(Debug, Serialize)]
pub struct SampleBody {
    pub id: i64,
    pub value: f64,
    pub timestamp: f64,
}

impl From<SensorSample> for SampleBody {
    fn from(sample: SensorSample) -> Self {
        SampleBody {
            id: sample.id,
            value: sample.value,
            timestamp: epoch_secs(sample.timestamp),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryBody {
    pub count: usize,
    pub data: Vec<SampleBody>,
}

pub async fn temperature_history(
    State(service): State<TelemetryService>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<HistoryBody>> {
    history(&service, SensorChannel::Temperature, params).await
}

pub async fn humidity_history(
    State(service): State<TelemetryService>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<HistoryBody>> {
    history(&service, SensorChannel::Humidity, params).await
}

async fn history(
    service: &TelemetryService,
    sensor: SensorChannel,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<HistoryBody>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let samples = service.history(sensor, params.into_query()?).await?;
    let data: Vec<SampleBody> = samples.into_iter().map(SampleBody::from).collect();
    Ok(Json(HistoryBody {
        count: data.len(),
        data,
    }))
}

// ----- light -----

pub async fn get_light(State(service): State<TelemetryService>) -> ApiResult<Json<Value>> {
    let state = service.latest(Channel::Light).await?;
    let light = state.value.as_light().unwrap_or(LightState::Off);
    Ok(Json(json!({
        "state": light,
        "timestamp": epoch_secs(state.updated_at),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LightBody {
    pub state: String,
}

pub async fn control_light(
    State(service): State<TelemetryService>,
    body: Result<Json<LightBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    // connection is checked before the body is validated
    ensure_connected(&service).await?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let state = parse_light(&body.state).map_err(ControlError::from)?;
    service.publish_control(ControlCommand::Light(state)).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Light turned {state}"),
        "state": state,
    })))
}

// ----- motion -----

pub async fn get_motion(State(service): State<TelemetryService>) -> ApiResult<Json<Value>> {
    let state = service.latest(Channel::Motion).await?;
    let position = state
        .value
        .as_motion()
        .unwrap_or(MotionPosition::CENTER);
    Ok(Json(json!({
        "direction": position.direction,
        "angle": position.angle,
        "timestamp": epoch_secs(state.updated_at),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MotionBody {
    pub direction: String,
    pub angle: Option<Value>,
}

/// Accepts integers, floats (truncated) and numeric strings.
fn angle_from_json(angle: Option<&Value>) -> Result<i64, PayloadError> {
    let invalid = || PayloadError::InvalidAngle(angle.map(|a| a.to_string()).unwrap_or_default());
    match angle {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

pub async fn control_motion(
    State(service): State<TelemetryService>,
    body: Result<Json<MotionBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    ensure_connected(&service).await?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    // direction is reported before angle problems
    parse_direction(&body.direction).map_err(ControlError::from)?;
    let angle = angle_from_json(body.angle.as_ref()).map_err(ControlError::from)?;
    let position = motion_from_parts(&body.direction, angle).map_err(ControlError::from)?;
    service
        .publish_control(ControlCommand::Motion(position))
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Motion set to {} {}°", position.direction, position.angle),
        "direction": position.direction,
        "angle": position.angle,
    })))
}

async fn ensure_connected(service: &TelemetryService) -> ApiResult<()> {
    if service.store().is_connected().await {
        Ok(())
    } else {
        Err(ControlError::NotConnected.into())
    }
}

// ----- status / debug publish -----

#[derive(Debug, Serialize)]
pub struct SubscriptionsBody {
    pub temperature_received: bool,
    pub humidity_received: bool,
    pub light_received: bool,
    pub motion_received: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub connected: bool,
    pub active: bool,
    pub last_message_time: f64,
    pub subscriptions: SubscriptionsBody,
}

impl From<ConnectionStatus> for StatusBody {
    fn from(status: ConnectionStatus) -> Self {
        StatusBody {
            connected: status.connected,
            active: status.active,
            last_message_time: epoch_secs(status.last_message_at),
            subscriptions: SubscriptionsBody {
                temperature_received: status.subscriptions.temperature,
                humidity_received: status.subscriptions.humidity,
                light_received: status.subscriptions.light,
                motion_received: status.subscriptions.motion,
            },
        }
    }
}

pub async fn get_status(State(service): State<TelemetryService>) -> Json<StatusBody> {
    Json(service.connection_status().await.into())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PublishBody {
    pub topic: Option<String>,
    pub value: Option<Value>,
}

pub async fn publish_raw(
    State(service): State<TelemetryService>,
    body: Result<Json<PublishBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    ensure_connected(&service).await?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let (topic, value) = match (body.topic, body.value) {
        (Some(topic), Some(value)) if !topic.is_empty() && !value.is_null() => (topic, value),
        _ => return Err(ApiError::BadRequest("Topic and value are required".to_string())),
    };
    let payload = match value {
        Value::String(text) => text,
        other => other.to_string(),
    };

    service.publish_raw(&topic, &payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Published {payload} to {topic}"),
    })))
}

// ----- stats -----

#[derive(Debug, Serialize)]
pub struct SummaryBody {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub first_record: f64,
    pub last_record: f64,
}

/// Serializes to `{}` when the channel has no samples.
#[derive(Debug, Serialize)]
pub struct StatsBody {
    #[serde(flatten)]
    pub summary: Option<SummaryBody>,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatsBody {
    pub count: i64,
    pub stats: StatsBody,
}

impl From<SampleStats> for ChannelStatsBody {
    fn from(stats: SampleStats) -> Self {
        ChannelStatsBody {
            count: stats.count,
            stats: StatsBody {
                summary: stats.summary.map(|s| SummaryBody {
                    min: s.min,
                    max: s.max,
                    avg: s.avg,
                    first_record: epoch_secs(s.first_record),
                    last_record: epoch_secs(s.last_record),
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllStatsBody {
    pub temperature: ChannelStatsBody,
    pub humidity: ChannelStatsBody,
}

pub async fn get_stats(State(service): State<TelemetryService>) -> ApiResult<Json<AllStatsBody>> {
    Ok(Json(AllStatsBody {
        temperature: service.stats(SensorChannel::Temperature).await?.into(),
        humidity: service.stats(SensorChannel::Humidity).await?.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_accepts_numbers_and_numeric_strings() {
        assert_eq!(angle_from_json(Some(&json!(45))), Ok(45));
        assert_eq!(angle_from_json(Some(&json!(45.9))), Ok(45));
        assert_eq!(angle_from_json(Some(&json!(" 30 "))), Ok(30));
        assert!(angle_from_json(Some(&json!("wide"))).is_err());
        assert!(angle_from_json(Some(&json!(null))).is_err());
        assert!(angle_from_json(None).is_err());
    }

    #[test]
    fn history_params_default_limit() {
        let query = HistoryParams::default().into_query().unwrap();
        assert_eq!(query.limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(query.start, None);
    }

    #[test]
    fn unparseable_history_params_fall_back() {
        let params = HistoryParams {
            limit: Some("-1".to_string()),
            start_time: Some("x".to_string()),
            end_time: Some("inf".to_string()),
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(query.start, None);
        assert_eq!(query.end, None);

        let params = HistoryParams {
            limit: Some(" 7 ".to_string()),
            start_time: Some("2.5".to_string()),
            end_time: None,
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.limit, 7);
        assert_eq!(query.start, DateTime::<Utc>::from_timestamp_millis(2500));
    }

    #[test]
    fn empty_stats_serialize_as_empty_object() {
        let body = ChannelStatsBody::from(SampleStats::default());
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({ "count": 0, "stats": {} })
        );
    }
}
