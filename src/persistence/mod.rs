//! # Persistence Module
//!
//! Durable history for the numeric channels. Each sensor channel has its own
//! append-only table; rows are never updated or deleted by the bridge.
//!
//! ## Error Handling Strategy
//! Storage errors surface as [`PersistenceError`]. On the ingest path they are
//! logged and dropped (the in-memory state is not rolled back); on the query
//! path they are returned to the caller and reported as a 500.

pub mod sample_store;

pub use sample_store::SampleStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// One persisted reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSample {
    pub id: i64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// History filter. `start` is inclusive, `end` exclusive; both optional.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryQuery {
    pub limit: u32,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
            start: None,
            end: None,
        }
    }
}

/// Aggregates over every stored sample of a channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleStats {
    pub count: i64,
    pub summary: Option<StatsSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub first_record: DateTime<Utc>,
    pub last_record: DateTime<Utc>,
}
