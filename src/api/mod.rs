//! REST surface.
//!
//! ```text
//! GET  /                              health
//! GET  /api/mqtt/temperature[/history]
//! GET  /api/mqtt/humidity[/history]
//! GET  /api/mqtt/light    POST /api/mqtt/light
//! GET  /api/mqtt/motion   POST /api/mqtt/motion
//! GET  /api/mqtt/status   POST /api/mqtt/publish
//! GET  /api/mqtt/stats
//! ```
//!
//! Every handler goes through [`TelemetryService`]; no handler touches the
//! broker or the database directly.

pub mod error;
pub mod handlers;

pub use error::ApiError;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::service::TelemetryService;

pub const API_PREFIX: &str = "/api/mqtt";

pub fn router(service: TelemetryService, cors: CorsLayer) -> Router {
    let mqtt_routes = Router::new()
        .route("/temperature", get(handlers::get_temperature))
        .route("/temperature/history", get(handlers::temperature_history))
        .route("/humidity", get(handlers::get_humidity))
        .route("/humidity/history", get(handlers::humidity_history))
        .route(
            "/light",
            get(handlers::get_light).post(handlers::control_light),
        )
        .route(
            "/motion",
            get(handlers::get_motion).post(handlers::control_motion),
        )
        .route("/status", get(handlers::get_status))
        .route("/publish", axum::routing::post(handlers::publish_raw))
        .route("/stats", get(handlers::get_stats));

    Router::new()
        .route("/", get(handlers::health))
        .nest(API_PREFIX, mqtt_routes)
        .fallback(handlers::not_found)
        .layer(cors)
        .with_state(service)
}
