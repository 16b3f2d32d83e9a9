use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reading::{Classification, Reading};
use super::station::Station;

pub const TYPE_WATER_ALERT: &str = "notification:water_alert";

/// Namespace for deterministic alert task ids.
const ALERT_TASK_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0a_8e55_1f0c_7a2b_9d31);

/// Payload of a water alert task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTask {
    pub station_id: i64,
    pub station_name: String,
    pub status: Classification,
    pub water_level: f64,
    pub shore_level: f64,
    #[serde(default)]
    pub description: String,
    pub measured_at: String,
}

impl AlertTask {
    /// Builds the task for a persisted reading. `measured_at` is rendered in
    /// the source's civil offset as `YYYY-MM-DD HH:MM`.
    pub fn for_reading(
        station: &Station,
        reading: &Reading,
        threshold: f64,
        offset: FixedOffset,
    ) -> Self {
        Self {
            station_id: station.id,
            station_name: reading
                .source
                .clone()
                .unwrap_or_else(|| station.name.clone()),
            status: reading.classification,
            water_level: reading.level,
            shore_level: threshold,
            description: reading.note.clone().unwrap_or_default(),
            measured_at: format_local(reading.measured_at, offset),
        }
    }

    /// One task id per station measurement, so re-enqueueing the same
    /// reading keys to the same task.
    pub fn task_id(&self, measured_at: DateTime<Utc>) -> Uuid {
        let name = format!("{}:{}", self.station_id, measured_at.timestamp());
        Uuid::new_v5(&ALERT_TASK_NAMESPACE, name.as_bytes())
    }
}

pub fn format_local(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}
