//! In-process store with the same semantics as the PostgreSQL gateway:
//! stations act as a foreign key, `(station_id, measured_at)` is unique and a
//! failed batch leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ReadingStore, StationScope};
use crate::error::PersistenceError;
use crate::models::{NewReading, Reading, ReadingStatus, Station};

#[derive(Default)]
struct Tables {
    stations: Vec<Station>,
    readings: Vec<Reading>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryReadingStore {
    tables: Mutex<Tables>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stations(stations: Vec<Station>) -> Self {
        let store = Self::new();
        store.lock().stations = stations;
        store
    }

    /// Every stored reading regardless of status, ordered by id.
    pub fn all_readings(&self) -> Vec<Reading> {
        self.lock().readings.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A panic while holding the lock can only come from a test assertion.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn active_stations(&self) -> Result<Vec<Station>, PersistenceError> {
        Ok(self
            .lock()
            .stations
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn insert_readings(&self, batch: &[NewReading]) -> Result<Vec<Reading>, PersistenceError> {
        let mut tables = self.lock();
        let now = Utc::now();
        let mut staged: Vec<Reading> = Vec::new();
        let mut next_id = tables.next_id;

        for reading in batch {
            if !tables.stations.iter().any(|s| s.id == reading.station_id) {
                return Err(PersistenceError::UnknownStation(reading.station_id));
            }
            let duplicate = tables
                .readings
                .iter()
                .chain(staged.iter())
                .any(|r| r.station_id == reading.station_id && r.measured_at == reading.measured_at);
            if duplicate {
                continue;
            }

            next_id += 1;
            staged.push(Reading {
                id: next_id,
                station_id: reading.station_id,
                level: reading.level,
                classification: reading.classification,
                is_flooded: reading.is_flooded,
                note: reading.note.clone(),
                image: reading.image.clone(),
                source: reading.source.clone(),
                measured_at: reading.measured_at,
                status: ReadingStatus::Active,
                scheduled_delete_at: None,
                created_at: now,
            });
        }

        tables.next_id = next_id;
        tables.readings.extend(staged.iter().cloned());
        Ok(staged)
    }

    async fn mark_for_deletion(
        &self,
        scope: StationScope,
        keep_latest: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let mut tables = self.lock();

        let mut by_station: HashMap<i64, Vec<(DateTime<Utc>, i64)>> = HashMap::new();
        for r in tables.readings.iter() {
            if r.status != ReadingStatus::Deleted && scope.includes(r.station_id) {
                by_station
                    .entry(r.station_id)
                    .or_default()
                    .push((r.measured_at, r.id));
            }
        }

        let mut eligible = Vec::new();
        for (_, mut rows) in by_station {
            rows.sort_by(|a, b| b.cmp(a));
            eligible.extend(rows.into_iter().skip(keep_latest as usize).map(|(_, id)| id));
        }

        let mut marked = 0;
        for r in tables.readings.iter_mut() {
            if r.status == ReadingStatus::Active && eligible.contains(&r.id) {
                r.status = ReadingStatus::PendingDeletion;
                r.scheduled_delete_at = Some(scheduled_at);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn pending_deletions(&self) -> Result<Vec<Reading>, PersistenceError> {
        let mut pending: Vec<Reading> = self
            .lock()
            .readings
            .iter()
            .filter(|r| r.status == ReadingStatus::PendingDeletion)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.station_id, r.measured_at));
        Ok(pending)
    }

    async fn hard_delete(&self, id: i64) -> Result<bool, PersistenceError> {
        let mut tables = self.lock();
        let before = tables.readings.len();
        tables
            .readings
            .retain(|r| !(r.id == id && r.status == ReadingStatus::PendingDeletion));
        Ok(tables.readings.len() < before)
    }

    async fn cancel_deletion(&self, id: i64) -> Result<bool, PersistenceError> {
        let mut tables = self.lock();
        match tables
            .readings
            .iter_mut()
            .find(|r| r.id == id && r.status == ReadingStatus::PendingDeletion)
        {
            Some(r) => {
                r.status = ReadingStatus::Active;
                r.scheduled_delete_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn readings_for_station(
        &self,
        station_id: i64,
        limit: i64,
    ) -> Result<Vec<Reading>, PersistenceError> {
        let mut readings: Vec<Reading> = self
            .lock()
            .readings
            .iter()
            .filter(|r| r.station_id == station_id && r.status == ReadingStatus::Active)
            .cloned()
            .collect();
        readings.sort_by(|a, b| (b.measured_at, b.id).cmp(&(a.measured_at, a.id)));
        readings.truncate(limit.max(0) as usize);
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use chrono::{Duration, TimeZone};

    fn station(id: i64) -> Station {
        Station {
            id,
            external_id: 1000 + id,
            name: format!("Station {}", id),
            latitude: 13.75,
            longitude: 100.5,
            bank_level: Some(1.5),
            is_active: true,
        }
    }

    fn new_reading(station_id: i64, hour: i64, level: f64) -> NewReading {
        let base = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        NewReading {
            station_id,
            level,
            classification: Classification::Safe,
            is_flooded: false,
            note: None,
            image: None,
            source: None,
            measured_at: base + Duration::hours(hour),
        }
    }

    #[tokio::test]
    async fn test_danger_reading_round_trip() {
        let store = MemoryReadingStore::with_stations(vec![station(1)]);
        let mut reading = new_reading(1, 0, 2.0);
        reading.classification = Classification::Danger;
        reading.is_flooded = true;

        store.insert_readings(&[reading]).await.unwrap();
        let fetched = store.readings_for_station(1, 10).await.unwrap();

        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].classification, Classification::Danger);
        assert!((fetched[0].level - 2.0).abs() < 1e-9);
        assert_eq!(fetched[0].status, ReadingStatus::Active);
    }

    #[tokio::test]
    async fn test_retention_keeps_latest_per_station() {
        let store = MemoryReadingStore::with_stations(vec![station(1), station(2)]);
        // Insert out of order to make sure ranking uses measured_at.
        let batch: Vec<NewReading> = [3, 9, 0, 5, 1, 7, 2, 8, 4, 6]
            .iter()
            .map(|h| new_reading(1, *h, 1.0))
            .chain((0..3).map(|h| new_reading(2, h, 1.0)))
            .collect();
        store.insert_readings(&batch).await.unwrap();

        let marked = store
            .mark_for_deletion(StationScope::All, 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(marked, 5);

        let base = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        for r in store.all_readings() {
            let hour = (r.measured_at - base).num_hours();
            let expected = if r.station_id == 1 && hour < 5 {
                ReadingStatus::PendingDeletion
            } else {
                ReadingStatus::Active
            };
            assert_eq!(r.status, expected, "station {} hour {}", r.station_id, hour);
        }

        // A second pass has nothing new to mark.
        let again = store
            .mark_for_deletion(StationScope::All, 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_retention_scoped_to_station() {
        let store = MemoryReadingStore::with_stations(vec![station(1), station(2)]);
        let batch: Vec<NewReading> = (0..4)
            .map(|h| new_reading(1, h, 1.0))
            .chain((0..4).map(|h| new_reading(2, h, 1.0)))
            .collect();
        store.insert_readings(&batch).await.unwrap();

        let marked = store
            .mark_for_deletion(StationScope::Station(2), 1, Utc::now())
            .await
            .unwrap();
        assert_eq!(marked, 3);
        assert_eq!(store.readings_for_station(1, 10).await.unwrap().len(), 4);
        assert_eq!(store.readings_for_station(2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_insert_is_atomic() {
        let store = MemoryReadingStore::with_stations(vec![station(1)]);
        let mut batch: Vec<NewReading> = (0..5).map(|h| new_reading(1, h, 1.0)).collect();
        batch[2].station_id = 99;

        let err = store.insert_readings(&batch).await.unwrap_err();
        assert!(matches!(err, PersistenceError::UnknownStation(99)));
        assert!(store.all_readings().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_measurement_is_skipped() {
        let store = MemoryReadingStore::with_stations(vec![station(1)]);
        let first = store.insert_readings(&[new_reading(1, 0, 1.0)]).await.unwrap();
        let second = store
            .insert_readings(&[new_reading(1, 0, 1.0), new_reading(1, 1, 1.1)])
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(store.all_readings().len(), 2);
    }

    #[tokio::test]
    async fn test_hard_delete_is_idempotent() {
        let store = MemoryReadingStore::with_stations(vec![station(1)]);
        let batch: Vec<NewReading> = (0..2).map(|h| new_reading(1, h, 1.0)).collect();
        store.insert_readings(&batch).await.unwrap();
        store
            .mark_for_deletion(StationScope::All, 1, Utc::now())
            .await
            .unwrap();

        let pending = store.pending_deletions().await.unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;

        assert!(store.hard_delete(id).await.unwrap());
        assert!(!store.hard_delete(id).await.unwrap());
        assert_eq!(store.all_readings().len(), 1);
    }

    #[tokio::test]
    async fn test_hard_delete_skips_cancelled_reading() {
        let store = MemoryReadingStore::with_stations(vec![station(1)]);
        let batch: Vec<NewReading> = (0..3).map(|h| new_reading(1, h, 1.0)).collect();
        store.insert_readings(&batch).await.unwrap();
        store
            .mark_for_deletion(StationScope::All, 1, Utc::now())
            .await
            .unwrap();

        let pending = store.pending_deletions().await.unwrap();
        assert!(store.cancel_deletion(pending[0].id).await.unwrap());
        assert!(!store.hard_delete(pending[0].id).await.unwrap());
        assert!(store.hard_delete(pending[1].id).await.unwrap());

        let active = store.readings_for_station(1, 10).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|r| r.scheduled_delete_at.is_none()));
    }
}
