//! SQLite-backed sample tables.
//!
//! Timestamps are stored as INTEGER milliseconds since the epoch so that range
//! filters and ordering are plain integer comparisons.

use super::{HistoryQuery, PersistenceError, SampleStats, SensorSample, StatsSummary};
use crate::telemetry::SensorChannel;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

#[derive(Debug, sqlx::FromRow)]
struct SampleRow {
    id: i64,
    value: f64,
    timestamp: i64,
}

impl TryFrom<SampleRow> for SensorSample {
    type Error = PersistenceError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        Ok(SensorSample {
            id: row.id,
            value: row.value,
            timestamp: from_millis(row.timestamp)?,
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(PersistenceError::InvalidTimestamp(millis))
}

#[derive(Debug, Clone)]
pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    /// Opens the database at `url` and creates the sample tables if needed.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        // every connection to `sqlite::memory:` is its own database
        let in_memory = url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // closing the only connection would drop the database
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options.connect(url).await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "sample store ready");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, PersistenceError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        for channel in SensorChannel::ALL {
            let table = channel.table_name();
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    value REAL NOT NULL,
                    timestamp INTEGER NOT NULL
                );"
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp DESC);"
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Appends one sample and returns its id.
    pub async fn append(
        &self,
        channel: SensorChannel,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<i64, PersistenceError> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (value, timestamp) VALUES (?, ?)",
            channel.table_name()
        ))
        .bind(value)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(%channel, id, value, "sample stored");
        Ok(id)
    }

    /// Newest-first samples inside `[start, end)`, at most `limit` rows.
    pub async fn history(
        &self,
        channel: SensorChannel,
        query: HistoryQuery,
    ) -> Result<Vec<SensorSample>, PersistenceError> {
        let start = query.start.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let end = query.end.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, SampleRow>(&format!(
            "SELECT id, value, timestamp FROM {}
             WHERE timestamp >= ? AND timestamp < ?
             ORDER BY timestamp DESC, id DESC
             LIMIT ?",
            channel.table_name()
        ))
        .bind(start)
        .bind(end)
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SensorSample::try_from).collect()
    }

    pub async fn stats(&self, channel: SensorChannel) -> Result<SampleStats, PersistenceError> {
        let (count, min, max, avg, first, last) = sqlx::query_as::<
            _,
            (i64, Option<f64>, Option<f64>, Option<f64>, Option<i64>, Option<i64>),
        >(&format!(
            "SELECT COUNT(*), MIN(value), MAX(value), AVG(value), MIN(timestamp), MAX(timestamp)
             FROM {}",
            channel.table_name()
        ))
        .fetch_one(&self.pool)
        .await?;

        let summary = match (min, max, avg, first, last) {
            (Some(min), Some(max), Some(avg), Some(first), Some(last)) if count > 0 => {
                Some(StatsSummary {
                    min,
                    max,
                    avg,
                    first_record: from_millis(first)?,
                    last_record: from_millis(last)?,
                })
            }
            _ => None,
        };

        Ok(SampleStats { count, summary })
    }

    pub async fn count(&self, channel: SensorChannel) -> Result<i64, PersistenceError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", channel.table_name()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
