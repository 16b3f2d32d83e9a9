use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::Cycle;
use crate::db::{ReadingStore, StationScope};
use crate::error::PersistenceError;
use crate::files;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RetentionReport {
    pub marked: u64,
    pub pending: usize,
    pub purged: usize,
    pub file_failures: usize,
    pub delete_failures: usize,
}

/// Mark, list, purge. Works only from persisted status.
pub struct RetentionCycle {
    store: Arc<dyn ReadingStore>,
    keep_latest: u32,
    upload_dir: PathBuf,
}

impl RetentionCycle {
    pub fn new(store: Arc<dyn ReadingStore>, keep_latest: u32, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            keep_latest,
            upload_dir: upload_dir.into(),
        }
    }

    pub async fn run(&self) -> Result<RetentionReport, PersistenceError> {
        let mut report = RetentionReport::default();

        // Marking
        report.marked = self
            .store
            .mark_for_deletion(StationScope::All, self.keep_latest, Utc::now())
            .await?;

        // Listing
        let pending = self.store.pending_deletions().await?;
        report.pending = pending.len();

        // Purging
        for reading in pending {
            let deleted = match self.store.hard_delete(reading.id).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    error!(reading_id = reading.id, cycle = "retention", "Failed to delete reading: {}", e);
                    report.delete_failures += 1;
                    continue;
                }
            };

            if !deleted {
                debug!(reading_id = reading.id, "Reading no longer pending deletion, kept");
                continue;
            }
            report.purged += 1;

            if let Some(image) = reading.image.as_deref() {
                if let Err(e) = files::remove_image(&self.upload_dir, image).await {
                    warn!(
                        reading_id = reading.id,
                        image,
                        cycle = "retention",
                        "Failed to remove image: {}",
                        e
                    );
                    report.file_failures += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Cycle for RetentionCycle {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn tick(&self) {
        match self.run().await {
            Ok(report) => info!(
                marked = report.marked,
                pending = report.pending,
                purged = report.purged,
                file_failures = report.file_failures,
                delete_failures = report.delete_failures,
                "Retention cycle finished"
            ),
            Err(e) => error!(cycle = "retention", "Retention cycle failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryReadingStore;
    use crate::models::{Classification, NewReading, Reading, ReadingStatus, Station};
    use chrono::{DateTime, Duration, TimeZone};
    use std::path::Path;

    fn station(id: i64) -> Station {
        Station {
            id,
            external_id: 2000 + id,
            name: format!("Station {}", id),
            latitude: 13.9,
            longitude: 100.5,
            bank_level: Some(1.5),
            is_active: true,
        }
    }

    fn reading(station_id: i64, hour: i64, image: Option<&str>) -> NewReading {
        let base = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        NewReading {
            station_id,
            level: 1.0,
            classification: Classification::Safe,
            is_flooded: false,
            note: None,
            image: image.map(str::to_string),
            source: None,
            measured_at: base + Duration::hours(hour),
        }
    }

    /// Fails `hard_delete` for one reading id and delegates the rest.
    struct FailingDelete {
        inner: MemoryReadingStore,
        fail_id: i64,
    }

    #[async_trait]
    impl ReadingStore for FailingDelete {
        async fn active_stations(&self) -> Result<Vec<Station>, PersistenceError> {
            self.inner.active_stations().await
        }

        async fn insert_readings(&self, batch: &[NewReading]) -> Result<Vec<Reading>, PersistenceError> {
            self.inner.insert_readings(batch).await
        }

        async fn mark_for_deletion(
            &self,
            scope: StationScope,
            keep_latest: u32,
            scheduled_at: DateTime<Utc>,
        ) -> Result<u64, PersistenceError> {
            self.inner.mark_for_deletion(scope, keep_latest, scheduled_at).await
        }

        async fn pending_deletions(&self) -> Result<Vec<Reading>, PersistenceError> {
            self.inner.pending_deletions().await
        }

        async fn hard_delete(&self, id: i64) -> Result<bool, PersistenceError> {
            if id == self.fail_id {
                return Err(PersistenceError::Timeout {
                    operation: "hard_delete",
                    after: std::time::Duration::from_secs(5),
                });
            }
            self.inner.hard_delete(id).await
        }

        async fn cancel_deletion(&self, id: i64) -> Result<bool, PersistenceError> {
            self.inner.cancel_deletion(id).await
        }

        async fn readings_for_station(
            &self,
            station_id: i64,
            limit: i64,
        ) -> Result<Vec<Reading>, PersistenceError> {
            self.inner.readings_for_station(station_id, limit).await
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"jpeg").unwrap();
    }

    #[tokio::test]
    async fn test_purges_oldest_and_removes_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryReadingStore::with_stations(vec![station(1)]));
        let batch: Vec<NewReading> = (0..7)
            .map(|h| {
                let name = format!("r{}.jpg", h);
                touch(dir.path(), &name);
                reading(1, h, Some(name.as_str()))
            })
            .collect();
        store.insert_readings(&batch).await.unwrap();

        let cycle = RetentionCycle::new(store.clone(), 5, dir.path());
        let report = cycle.run().await.unwrap();

        assert_eq!(
            report,
            RetentionReport {
                marked: 2,
                pending: 2,
                purged: 2,
                file_failures: 0,
                delete_failures: 0,
            }
        );
        assert_eq!(store.all_readings().len(), 5);
        assert!(!dir.path().join("r0.jpg").exists());
        assert!(!dir.path().join("r1.jpg").exists());
        assert!(dir.path().join("r2.jpg").exists());
    }

    #[tokio::test]
    async fn test_missing_image_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryReadingStore::with_stations(vec![station(1)]));
        let batch = vec![reading(1, 0, Some("gone.jpg")), reading(1, 1, None)];
        store.insert_readings(&batch).await.unwrap();

        let report = RetentionCycle::new(store, 1, dir.path()).run().await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(report.file_failures, 0);
    }

    #[tokio::test]
    async fn test_purge_continues_past_failed_delete() {
        let dir = tempfile::tempdir().unwrap();
        let inner = MemoryReadingStore::with_stations(vec![station(1)]);
        let batch: Vec<NewReading> = (0..4)
            .map(|h| {
                let name = format!("r{}.jpg", h);
                touch(dir.path(), &name);
                reading(1, h, Some(name.as_str()))
            })
            .collect();
        let stored = inner.insert_readings(&batch).await.unwrap();

        // The oldest reading's delete fails; the next one must still go.
        let store = Arc::new(FailingDelete {
            inner,
            fail_id: stored[0].id,
        });
        let report = RetentionCycle::new(store.clone(), 2, dir.path())
            .run()
            .await
            .unwrap();

        assert_eq!(report.pending, 2);
        assert_eq!(report.purged, 1);
        assert_eq!(report.delete_failures, 1);

        let remaining = store.inner.all_readings();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].status, ReadingStatus::PendingDeletion);
        // The row that survived keeps its file.
        assert!(dir.path().join("r0.jpg").exists());
        assert!(!dir.path().join("r1.jpg").exists());
    }

    #[tokio::test]
    async fn test_unsafe_image_name_counts_as_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryReadingStore::with_stations(vec![station(1)]));
        let batch = vec![
            reading(1, 0, Some("../outside.jpg")),
            reading(1, 1, Some("ok.jpg")),
            reading(1, 2, None),
        ];
        touch(dir.path(), "ok.jpg");
        store.insert_readings(&batch).await.unwrap();

        let report = RetentionCycle::new(store.clone(), 1, dir.path())
            .run()
            .await
            .unwrap();

        assert_eq!(report.purged, 2);
        assert_eq!(report.file_failures, 1);
        assert!(!dir.path().join("ok.jpg").exists());
        assert_eq!(store.all_readings().len(), 1);
    }
}
