use async_trait::async_trait;
use chrono::FixedOffset;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::Cycle;
use crate::classifier;
use crate::db::ReadingStore;
use crate::error::CycleError;
use crate::models::{AlertTask, NewReading, Station};
use crate::queue::AlertProducer;
use crate::telemetry::TelemetrySource;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestionReport {
    pub observations: usize,
    pub skipped: usize,
    pub stored: usize,
    pub alerts_enqueued: usize,
    pub alerts_failed: usize,
}

/// Fetch, classify, persist, enqueue. A stage failure ends the cycle before
/// any later stage runs.
pub struct IngestionCycle {
    source: Arc<dyn TelemetrySource>,
    store: Arc<dyn ReadingStore>,
    producer: AlertProducer,
    margin: f64,
    offset: FixedOffset,
}

impl IngestionCycle {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        store: Arc<dyn ReadingStore>,
        producer: AlertProducer,
        margin: f64,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            store,
            producer,
            margin,
            offset,
        }
    }

    pub async fn run(&self) -> Result<IngestionReport, CycleError> {
        let mut report = IngestionReport::default();

        // Fetching
        let snapshot = self.source.fetch().await?;
        let (observations, rejected) = snapshot.observations(self.offset);
        report.observations = observations.len() + rejected.len();
        for external_id in rejected {
            warn!(external_station_id = external_id, "Skipping record with invalid measurement time");
            report.skipped += 1;
        }

        // Classifying
        let stations = self.store.active_stations().await?;
        let by_external: HashMap<i64, &Station> =
            stations.iter().map(|s| (s.external_id, s)).collect();

        let mut batch = Vec::with_capacity(observations.len());
        let mut thresholds: HashMap<i64, f64> = HashMap::new();

        for obs in &observations {
            let Some(station) = by_external.get(&obs.external_station_id) else {
                debug!(
                    external_station_id = obs.external_station_id,
                    "No active station for upstream record"
                );
                report.skipped += 1;
                continue;
            };

            let assessment = match classifier::assess(
                station.id,
                obs.level,
                station.bank_level,
                obs.reported_threshold,
                self.margin,
            ) {
                Ok(a) => a,
                Err(e) => {
                    warn!(station_id = station.id, cycle = "ingestion", "Skipping station: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };

            thresholds.insert(station.id, assessment.threshold);
            batch.push(NewReading {
                station_id: station.id,
                level: assessment.level,
                classification: assessment.classification,
                is_flooded: assessment.is_flooded,
                note: None,
                image: None,
                source: obs.station_name.clone(),
                measured_at: obs.measured_at,
            });
        }

        // Persisting
        let stored = self.store.insert_readings(&batch).await?;
        report.stored = stored.len();

        // Enqueuing
        for reading in stored.iter().filter(|r| r.classification.is_alerting()) {
            let Some(station) = stations.iter().find(|s| s.id == reading.station_id) else {
                continue;
            };
            let threshold = thresholds
                .get(&reading.station_id)
                .copied()
                .unwrap_or_default();

            let task = AlertTask::for_reading(station, reading, threshold, self.offset);
            match self
                .producer
                .enqueue(&task, task.task_id(reading.measured_at))
                .await
            {
                Ok(_) => report.alerts_enqueued += 1,
                Err(e) => {
                    error!(
                        station_id = station.id,
                        reading_id = reading.id,
                        cycle = "ingestion",
                        "Failed to enqueue alert: {}",
                        e
                    );
                    report.alerts_failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Cycle for IngestionCycle {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn tick(&self) {
        match self.run().await {
            Ok(report) => info!(
                observations = report.observations,
                skipped = report.skipped,
                stored = report.stored,
                alerts_enqueued = report.alerts_enqueued,
                alerts_failed = report.alerts_failed,
                "Ingestion cycle finished"
            ),
            Err(e) => error!(cycle = "ingestion", "Ingestion cycle failed: {}", e),
        }
    }
}
