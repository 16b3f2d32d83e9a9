use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::future::Future;
use std::time::Duration;

use crate::error::PersistenceError;
use crate::models::{NewReading, Reading, Station};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryReadingStore;
pub use postgres::PgReadingStore;

pub type DbPool = Pool<Postgres>;

/// Per-call deadlines, sized by how much work each statement does.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const ROW_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool, PersistenceError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(QUERY_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &DbPool) -> Result<(), PersistenceError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Which stations a retention mark applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationScope {
    All,
    Station(i64),
}

impl StationScope {
    fn station_id(self) -> Option<i64> {
        match self {
            StationScope::All => None,
            StationScope::Station(id) => Some(id),
        }
    }

    fn includes(self, station_id: i64) -> bool {
        self.station_id().map_or(true, |id| id == station_id)
    }
}

/// Persistence gateway for stations and readings.
///
/// Errors are surfaced as-is; retrying is the scheduler's job.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Stations eligible for ingestion.
    async fn active_stations(&self) -> Result<Vec<Station>, PersistenceError>;

    /// Inserts the whole batch in one transaction and returns the rows that
    /// were stored. A reading whose `(station_id, measured_at)` already exists
    /// is skipped. Any other row failure rolls back the entire batch.
    async fn insert_readings(&self, batch: &[NewReading]) -> Result<Vec<Reading>, PersistenceError>;

    /// Moves ACTIVE readings outside each station's `keep_latest` most recent
    /// to PENDING_DELETION. Returns the number of rows marked.
    async fn mark_for_deletion(
        &self,
        scope: StationScope,
        keep_latest: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Result<u64, PersistenceError>;

    async fn pending_deletions(&self) -> Result<Vec<Reading>, PersistenceError>;

    /// Deletes the reading if it is still PENDING_DELETION. Returns whether a
    /// row was removed; calling it again is a no-op.
    async fn hard_delete(&self, id: i64) -> Result<bool, PersistenceError>;

    /// Returns a PENDING_DELETION reading to ACTIVE.
    async fn cancel_deletion(&self, id: i64) -> Result<bool, PersistenceError>;

    /// ACTIVE readings of one station, newest first.
    async fn readings_for_station(
        &self,
        station_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>, PersistenceError>;
}

/// Bounds a store call by `after`; expiry abandons the call.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, PersistenceError>
where
    F: Future<Output = Result<T, PersistenceError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| PersistenceError::Timeout { operation, after })?
}
