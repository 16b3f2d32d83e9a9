use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{queries, with_timeout, DbPool, ReadingStore, StationScope};
use super::{BATCH_TIMEOUT, QUERY_TIMEOUT, ROW_TIMEOUT};
use crate::error::PersistenceError;
use crate::models::{NewReading, Reading, Station};

/// PostgreSQL-backed persistence gateway.
#[derive(Clone)]
pub struct PgReadingStore {
    pool: DbPool,
}

impl PgReadingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn insert_batch(&self, batch: &[NewReading]) -> Result<Vec<Reading>, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(batch.len());

        for reading in batch {
            // Dropping `tx` on the error path rolls the whole batch back.
            let row = sqlx::query_as::<_, Reading>(queries::INSERT_READING)
                .bind(reading.station_id)
                .bind(reading.level)
                .bind(reading.classification.as_str())
                .bind(reading.is_flooded)
                .bind(reading.note.as_deref())
                .bind(reading.image.as_deref())
                .bind(reading.source.as_deref())
                .bind(reading.measured_at)
                .fetch_optional(&mut *tx)
                .await?;

            match row {
                Some(row) => stored.push(row),
                None => debug!(
                    station_id = reading.station_id,
                    measured_at = %reading.measured_at,
                    "Reading already stored, skipping"
                ),
            }
        }

        tx.commit().await?;
        Ok(stored)
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn active_stations(&self) -> Result<Vec<Station>, PersistenceError> {
        with_timeout("active_stations", QUERY_TIMEOUT, async {
            let stations = sqlx::query_as::<_, Station>(queries::SELECT_ACTIVE_STATIONS)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(stations)
        })
        .await
    }

    async fn insert_readings(&self, batch: &[NewReading]) -> Result<Vec<Reading>, PersistenceError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        with_timeout("insert_readings", BATCH_TIMEOUT, self.insert_batch(batch)).await
    }

    async fn mark_for_deletion(
        &self,
        scope: StationScope,
        keep_latest: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        with_timeout("mark_for_deletion", BATCH_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(queries::MARK_FOR_DELETION)
                .bind(i64::from(keep_latest))
                .bind(scheduled_at)
                .bind(scope.station_id())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, PersistenceError>(result.rows_affected())
        })
        .await
    }

    async fn pending_deletions(&self) -> Result<Vec<Reading>, PersistenceError> {
        with_timeout("pending_deletions", QUERY_TIMEOUT, async {
            let pending = sqlx::query_as::<_, Reading>(queries::SELECT_PENDING_DELETIONS)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(pending)
        })
        .await
    }

    async fn hard_delete(&self, id: i64) -> Result<bool, PersistenceError> {
        with_timeout("hard_delete", ROW_TIMEOUT, async {
            let result = sqlx::query(queries::HARD_DELETE_READING)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(result.rows_affected() > 0)
        })
        .await
    }

    async fn cancel_deletion(&self, id: i64) -> Result<bool, PersistenceError> {
        with_timeout("cancel_deletion", ROW_TIMEOUT, async {
            let result = sqlx::query(queries::CANCEL_DELETION)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(result.rows_affected() > 0)
        })
        .await
    }

    async fn readings_for_station(
        &self,
        station_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>, PersistenceError> {
        with_timeout("readings_for_station", QUERY_TIMEOUT, async {
            let readings = sqlx::query_as::<_, Reading>(queries::SELECT_ACTIVE_READINGS_BY_STATION)
                .bind(station_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, PersistenceError>(readings)
        })
        .await
    }
}
