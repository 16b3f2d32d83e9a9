use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::UpstreamError;

pub const RESULT_OK: &str = "OK";

/// Envelope returned by the telemetry source.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub result: String,
    #[serde(default)]
    pub data: Vec<StationReading>,
}

#[derive(Debug, Deserialize)]
pub struct StationReading {
    #[serde(default)]
    pub id: Option<i64>,
    pub waterlevel_datetime: Option<String>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub waterlevel_msl: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub waterlevel_msl_previous: Option<f64>,
    pub station: UpstreamStation,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamStation {
    pub id: i64,
    #[serde(default)]
    pub tele_station_name: StationName,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub tele_station_lat: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub tele_station_long: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub min_bank: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub critical_level_msl: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StationName {
    #[serde(default)]
    pub th: Option<String>,
    #[serde(default)]
    pub en: Option<String>,
}

impl StationName {
    pub fn preferred(&self) -> Option<&str> {
        self.th
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.en.as_deref().filter(|s| !s.is_empty()))
    }
}

/// One station's measurement, normalised for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub external_station_id: i64,
    pub station_name: Option<String>,
    pub level: Option<f64>,
    pub reported_threshold: Option<f64>,
    pub measured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Decodes a response body and rejects envelopes whose result code is not
    /// the success sentinel.
    pub fn from_slice(body: &[u8]) -> Result<Self, UpstreamError> {
        let snapshot: Snapshot = serde_json::from_slice(body)?;
        if snapshot.result != RESULT_OK {
            return Err(UpstreamError::Result(snapshot.result));
        }
        Ok(snapshot)
    }

    /// Converts records into observations. Records with an unreadable
    /// measurement time are dropped and returned as station ids.
    pub fn observations(&self, offset: FixedOffset) -> (Vec<Observation>, Vec<i64>) {
        let mut observations = Vec::with_capacity(self.data.len());
        let mut rejected = Vec::new();

        for record in &self.data {
            let measured_at = record
                .waterlevel_datetime
                .as_deref()
                .and_then(|raw| parse_local_datetime(raw, offset));

            match measured_at {
                Some(measured_at) => observations.push(Observation {
                    external_station_id: record.station.id,
                    station_name: record.station.tele_station_name.preferred().map(str::to_string),
                    level: record.waterlevel_msl,
                    reported_threshold: record
                        .station
                        .critical_level_msl
                        .or(record.station.min_bank),
                    measured_at,
                }),
                None => rejected.push(record.station.id),
            }
        }

        (observations, rejected)
    }
}

/// Parses `YYYY-MM-DD HH:MM` in the given civil offset.
pub fn parse_local_datetime(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Lenient per field: numbers, numeric strings, empty strings and null are
/// accepted. Anything else decodes to `None` with a warning, so one bad value
/// only costs its own station.
fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
        Other(IgnoredAny),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(StringOrFloat::Float(f)) => Some(f),
        Some(StringOrFloat::String(s)) if s.trim().is_empty() => None,
        Some(StringOrFloat::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Some(f),
            _ => {
                warn!(value = %s, "Unparseable numeric field, treating as absent");
                None
            }
        },
        Some(StringOrFloat::Other(_)) => {
            warn!("Non-numeric field, treating as absent");
            None
        }
        None => None,
    })
}
