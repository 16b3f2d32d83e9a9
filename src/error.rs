//! Error types shared across the pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a usable snapshot from the telemetry source.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry source returned status {0}")]
    Status(u16),

    #[error("telemetry payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("telemetry source returned non-OK result: {0}")]
    Result(String),

    #[error("telemetry request timed out after {0:?}")]
    Timeout(Duration),
}

/// A station observation that cannot be classified.
#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("station {0} reported no water level")]
    MissingLevel(i64),

    #[error("station {0} has no bank level configured or reported")]
    MissingThreshold(i64),
}

/// Failure reported by the persistence gateway.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("reading references unknown station {0}")]
    UnknownStation(i64),
}

/// Failure talking to the task broker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("task could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker is closed")]
    Closed,
}

/// Producer-side failure: the alert was not handed to the broker.
#[derive(Debug, Error)]
#[error("failed to enqueue task {task_id}: {source}")]
pub struct EnqueueError {
    pub task_id: uuid::Uuid,
    #[source]
    pub source: QueueError,
}

/// Outcome of a failed task handler, deciding between retry and drop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// The task can never succeed (poison payload); dead-letter it now.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),

    /// The messaging channel failed; the queue's retry policy applies.
    #[error("transient dispatch failure: {0}")]
    Transient(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }
}

/// Failure of the outbound messaging channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned status {status}")]
    Status { channel: &'static str, status: u16 },
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        DispatchError::Transient(err.to_string())
    }
}

/// Invalid configuration detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Failure that ends a scheduler cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
