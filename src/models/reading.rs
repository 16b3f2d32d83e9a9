use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Danger classification of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Safe,
    Watch,
    Danger,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Safe => "SAFE",
            Classification::Watch => "WATCH",
            Classification::Danger => "DANGER",
        }
    }

    /// Only WATCH and DANGER readings produce alerts.
    pub fn is_alerting(self) -> bool {
        !matches!(self, Classification::Safe)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAFE" => Ok(Classification::Safe),
            "WATCH" => Ok(Classification::Watch),
            "DANGER" => Ok(Classification::Danger),
            other => Err(format!("unknown classification '{}'", other)),
        }
    }
}

/// Lifecycle status of a stored reading. Values are case-sensitive in the
/// database; read paths filter on `ACTIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    Active,
    PendingDeletion,
    Deleted,
}

impl ReadingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingStatus::Active => "ACTIVE",
            ReadingStatus::PendingDeletion => "PENDING_DELETION",
            ReadingStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReadingStatus::Active),
            "PENDING_DELETION" => Ok(ReadingStatus::PendingDeletion),
            "DELETED" => Ok(ReadingStatus::Deleted),
            other => Err(format!("unknown reading status '{}'", other)),
        }
    }
}

/// A reading as produced by the ingestion cycle, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub station_id: i64,
    pub level: f64,
    pub classification: Classification,
    pub is_flooded: bool,
    pub note: Option<String>,
    pub image: Option<String>,
    pub source: Option<String>,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub station_id: i64,
    pub level: f64,
    pub classification: Classification,
    pub is_flooded: bool,
    pub note: Option<String>,
    pub image: Option<String>,
    pub source: Option<String>,
    pub measured_at: DateTime<Utc>,
    pub status: ReadingStatus,
    pub scheduled_delete_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Reading {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let classification: String = row.try_get("classification")?;
        let status: String = row.try_get("status")?;

        Ok(Reading {
            id: row.try_get("id")?,
            station_id: row.try_get("station_id")?,
            level: row.try_get("level")?,
            classification: classification
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            is_flooded: row.try_get("is_flooded")?,
            note: row.try_get("note")?,
            image: row.try_get("image")?,
            source: row.try_get("source")?,
            measured_at: row.try_get("measured_at")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            scheduled_delete_at: row.try_get("scheduled_delete_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
