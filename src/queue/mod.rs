//! Durable, at-least-once task queue.
//!
//! Producers hand a [`TaskEnvelope`] to a [`TaskPublisher`]; the
//! [`worker::WorkerPool`] pulls deliveries from a [`TaskBroker`], runs the
//! [`TaskHandler`] under the envelope's timeout and then decides between ack,
//! requeue and dead-letter. Durability is the broker's job (Kafka in
//! production, [`memory::MemoryBroker`] in tests).

pub mod kafka;
pub mod memory;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::AlertQueueConfig;
use crate::error::{DispatchError, EnqueueError, QueueError};
use crate::models::{AlertTask, TYPE_WATER_ALERT};

pub use kafka::{KafkaBroker, KafkaPublisher};
pub use memory::MemoryBroker;
pub use worker::{Outcome, WorkerConfig, WorkerPool};

/// Wire format of a queued task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub kind: String,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Number of failed attempts so far.
    pub retried: u32,
    pub max_retry: u32,
    pub timeout_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    pub fn new(
        id: Uuid,
        kind: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.to_string(),
            queue: options.queue.clone(),
            payload,
            retried: 0,
            max_retry: options.max_retry,
            timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
            enqueued_at: now,
            available_at: now,
            last_error: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 1-based number of the attempt this envelope represents.
    pub fn attempt(&self) -> u32 {
        self.retried + 1
    }

    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }

    /// The envelope to republish after a failed attempt.
    pub fn next_attempt(&self, error: &DispatchError, delay: Duration) -> Self {
        let mut next = self.clone();
        next.retried += 1;
        next.available_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        next.last_error = Some(error.to_string());
        next
    }

    pub fn failed(&self, error: &DispatchError) -> Self {
        let mut dead = self.clone();
        dead.last_error = Some(error.to_string());
        dead
    }
}

/// Position of a delivery in the broker, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub receipt: Receipt,
}

/// Producer side of the broker.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError>;
}

/// Consumer side of the broker. A delivery is owned by exactly one caller of
/// [`TaskBroker::next`] until it is acknowledged.
#[async_trait]
pub trait TaskBroker: TaskPublisher {
    /// Waits for the next delivery. `QueueError::Closed` ends consumption.
    async fn next(&self) -> Result<Delivery, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Moves a task to the terminal dead-letter state.
    async fn dead_letter(&self, envelope: &TaskEnvelope) -> Result<(), QueueError>;
}

/// Executes one task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub queue: String,
    pub max_retry: u32,
    pub timeout: Duration,
}

impl From<&AlertQueueConfig> for EnqueueOptions {
    fn from(config: &AlertQueueConfig) -> Self {
        Self {
            queue: config.queue_name.clone(),
            max_retry: config.max_retry,
            timeout: config.task_timeout,
        }
    }
}

/// Enqueues water alerts for the dispatcher.
#[derive(Clone)]
pub struct AlertProducer {
    publisher: Arc<dyn TaskPublisher>,
    options: EnqueueOptions,
}

impl AlertProducer {
    pub fn new(publisher: Arc<dyn TaskPublisher>, options: EnqueueOptions) -> Self {
        Self { publisher, options }
    }

    pub async fn enqueue(&self, task: &AlertTask, task_id: Uuid) -> Result<Uuid, EnqueueError> {
        let payload = serde_json::to_value(task).map_err(|e| EnqueueError {
            task_id,
            source: QueueError::Encode(e),
        })?;
        let envelope = TaskEnvelope::new(task_id, TYPE_WATER_ALERT, payload, &self.options);

        self.publisher
            .publish(&envelope)
            .await
            .map_err(|source| EnqueueError { task_id, source })?;

        debug!(
            task_id = %task_id,
            queue = %self.options.queue,
            station_id = task.station_id,
            "Enqueued water alert"
        );
        Ok(task_id)
    }
}
